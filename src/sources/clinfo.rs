use tracing::debug;

use crate::{
    config_manager::InventoryConfig,
    errors::InventoryError,
    sources::{CapabilitySource, command::run_command},
};

// OpenCL device report through `clinfo --raw`
#[derive(Debug, Clone)]
pub struct ClinfoSource {
    command: String,
}

impl ClinfoSource {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            command: config.clinfo_command.clone(),
        }
    }
}

impl CapabilitySource for ClinfoSource {
    fn capability_stream(
        &self,
    ) -> impl Future<Output = Result<String, InventoryError>> + Send {
        let command = self.command.clone();

        async move {
            let output = run_command(&command, &["--raw"]).await?;
            debug!("Read {} lines of OpenCL capabilities", output.lines().count());

            Ok(output)
        }
    }
}

use tracing::{debug, info};

use crate::{
    config_manager::InventoryConfig, errors::InventoryError,
    sources::command::run_command,
};

// Installed version of the driver package, from `dpkg -l <package>`
#[derive(Debug, Clone)]
pub struct DpkgSource {
    command: String,
    package: String,
}

impl DpkgSource {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            command: config.dpkg_command.clone(),
            package: config.driver_package.clone(),
        }
    }

    pub async fn driver_version(&self) -> Result<String, InventoryError> {
        let output = run_command(&self.command, &["-l", &self.package]).await?;

        let version = parse_dpkg_version(&output, &self.package).ok_or_else(|| {
            debug!("{} is not listed by {}", self.package, self.command);
            InventoryError::unavailable(
                self.package.as_str(),
                format!("not listed by {}", self.command),
            )
        })?;

        info!("{} version: {version}", self.package);

        Ok(version)
    }
}

// The version is the third column of the line naming the package
pub fn parse_dpkg_version(text: &str, package: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        let _status = columns.next()?;

        if columns.next()? != package {
            return None;
        }

        columns.next().map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DPKG: &str = "\
Desired=Unknown/Install/Remove/Purge/Hold
| Status=Not/Inst/Conf-files/Unpacked/halF-conf/Half-inst/trig-aWait/Trig-pend
||/ Name              Version       Architecture Description
+++-=================-=============-============-==============================
ii  amdgpu-pro-core   19.30-855429  all          Core meta package for Pro
ii  amdgpu-pro        19.30-855429  amd64        Meta package to install amdgpu Pro
";

    #[test]
    fn finds_exact_package_line() {
        assert_eq!(
            parse_dpkg_version(DPKG, "amdgpu-pro").as_deref(),
            Some("19.30-855429")
        );
    }

    #[test]
    fn absent_package_has_no_version() {
        assert_eq!(parse_dpkg_version(DPKG, "rocm-dev"), None);
        assert_eq!(parse_dpkg_version("", "amdgpu-pro"), None);
    }
}

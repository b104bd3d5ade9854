use std::path::PathBuf;

use argparse::{ArgumentParser, Print, StoreOption, StoreTrue};

#[derive(Debug, Default)]
pub struct ArgsOptions {
    // Json configuration file, the built in defaults are used without it
    pub config_file_path: Option<PathBuf>,
    pub debug: bool,

    pub details: bool,
    pub clinfo: bool,
    pub pstates: bool,
    pub ppm: bool,
    pub json: bool,
    pub no_table: bool,

    // Keep reprinting the table until Ctrl-C
    pub watch: bool,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Inventory of the AMD GPUs of this host");

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                StoreOption,
                "The file path of the Json configuration file",
            );

            parser.refer(&mut options.debug).add_option(
                &["-d", "--debug"],
                StoreTrue,
                "Log debug diagnostics to stderr",
            );

            parser.refer(&mut options.details).add_option(
                &["--details"],
                StoreTrue,
                "Print every attribute of each card",
            );

            parser.refer(&mut options.clinfo).add_option(
                &["--clinfo"],
                StoreTrue,
                "Include the OpenCL capabilities in the details",
            );

            parser.refer(&mut options.pstates).add_option(
                &["--pstates"],
                StoreTrue,
                "Print the SCLK and MCLK P-state ladders",
            );

            parser.refer(&mut options.ppm).add_option(
                &["--ppm"],
                StoreTrue,
                "Print the power profile modes",
            );

            parser.refer(&mut options.json).add_option(
                &["--json"],
                StoreTrue,
                "Print a Json snapshot instead of text",
            );

            parser.refer(&mut options.no_table).add_option(
                &["--no-table"],
                StoreTrue,
                "Don't print the summary table",
            );

            parser.refer(&mut options.watch).add_option(
                &["-w", "--watch"],
                StoreTrue,
                "Refresh the live metrics until Ctrl-C",
            );

            // Show version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the program version",
            );

            parser.parse_args_or_exit();
        }

        options
    }
}

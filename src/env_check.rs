// Host preflight: overdrive feature mask, kernel release and the installed
// driver package. Findings are reported, none of them stops the inventory

use std::{fs, path::Path};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config_manager::InventoryConfig, errors::InventoryError,
    sources::dpkg::DpkgSource,
};

// Feature masks with the overdrive bit set
pub const OVERDRIVE_MASKS: [u64; 2] = [0xffff_7fff, 0xffff_ffff];
pub const MIN_KERNEL: (u32, u32) = (4, 8);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvReport {
    pub featuremask: Option<u64>,
    pub overdrive_enabled: bool,

    pub kernel_release: Option<String>,
    pub kernel_supported: bool,

    pub driver_version: Option<String>,

    #[serde(skip)]
    pub findings: Vec<InventoryError>,
}

impl EnvReport {
    pub fn is_ready(&self) -> bool {
        self.overdrive_enabled && self.kernel_supported
    }
}

// The module parameter is printed in decimal, accept hex as well
pub fn parse_featuremask(text: &str) -> Result<u64, String> {
    let text = text.trim();

    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };

    parsed.map_err(|e| format!("\"{text}\": {e}"))
}

// Major and minor number of a release like "5.4.0-42-generic"
pub fn parse_kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut numbers = release.trim().split(['.', '-']);

    let major = numbers.next()?.parse().ok()?;
    let minor = numbers.next()?.parse().ok()?;

    Some((major, minor))
}

fn read_source(path: &Path) -> Result<String, InventoryError> {
    fs::read_to_string(path)
        .map_err(|e| InventoryError::unavailable(path.display().to_string(), e))
}

fn check_featuremask(path: &Path, report: &mut EnvReport) {
    let mask = read_source(path).and_then(|text| {
        parse_featuremask(&text).map_err(|reason| {
            InventoryError::parse("feature mask", path.display().to_string(), reason)
        })
    });

    match mask {
        Ok(mask) => {
            report.featuremask = Some(mask);
            report.overdrive_enabled = OVERDRIVE_MASKS.contains(&mask);

            if report.overdrive_enabled {
                info!("AMD overdrive features enabled: {mask:#x}");
            } else {
                warn!("AMD overdrive features not enabled: {mask:#x}");
            }
        }
        Err(err) => {
            debug!("Cannot read the feature mask: {err}");
            report.findings.push(err);
        }
    }
}

fn check_kernel(path: &Path, report: &mut EnvReport) {
    let release = match read_source(path) {
        Ok(release) => release.trim().to_string(),
        Err(err) => {
            debug!("Cannot read the kernel release: {err}");
            report.findings.push(err);
            return;
        }
    };

    match parse_kernel_version(&release) {
        Some(version) => {
            report.kernel_supported = version >= MIN_KERNEL;
            if !report.kernel_supported {
                warn!(
                    "Using Linux kernel {release}, at least {}.{} is required",
                    MIN_KERNEL.0, MIN_KERNEL.1
                );
            }
        }
        None => {
            let err = InventoryError::parse(
                "kernel version",
                path.display().to_string(),
                format!("\"{release}\" is not MAJOR.MINOR"),
            );
            warn!("{err}");
            report.findings.push(err);
        }
    }

    report.kernel_release = Some(release);
}

pub async fn check_environment(config: &InventoryConfig) -> EnvReport {
    let mut report = EnvReport::default();

    check_featuremask(&config.featuremask_path, &mut report);
    check_kernel(&config.osrelease_path, &mut report);

    match DpkgSource::new(config).driver_version().await {
        Ok(version) => report.driver_version = Some(version),
        Err(err) => {
            debug!("Cannot determine the driver version: {err}");
            report.findings.push(err);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, mask: &str, release: &str) -> InventoryConfig {
        let featuremask_path = dir.path().join("ppfeaturemask");
        let osrelease_path = dir.path().join("osrelease");
        fs::write(&featuremask_path, mask).unwrap();
        fs::write(&osrelease_path, release).unwrap();

        InventoryConfig {
            featuremask_path,
            osrelease_path,
            dpkg_command: "surely-not-an-installed-dpkg".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_decimal_and_hex_masks() {
        assert_eq!(parse_featuremask("4294967295\n"), Ok(0xffff_ffff));
        assert_eq!(parse_featuremask("0xffff7fff"), Ok(0xffff_7fff));
        assert!(parse_featuremask("enabled").is_err());
    }

    #[test]
    fn parses_kernel_versions() {
        assert_eq!(parse_kernel_version("5.4.0-42-generic"), Some((5, 4)));
        assert_eq!(parse_kernel_version("4.8-rc1"), Some((4, 8)));
        assert_eq!(parse_kernel_version("linux"), None);
    }

    #[tokio::test]
    async fn ready_host() {
        let dir = TempDir::new().unwrap();
        let report =
            check_environment(&config(&dir, "4294934527\n", "5.15.0-91-generic\n"))
                .await;

        assert_eq!(report.featuremask, Some(0xffff_7fff));
        assert!(report.overdrive_enabled);
        assert!(report.kernel_supported);
        assert!(report.is_ready());

        // Only the missing package tool is reported
        assert_eq!(report.findings.len(), 1);
        assert!(matches!(
            report.findings[0],
            InventoryError::SourceUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn old_kernel_and_default_mask_are_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let report =
            check_environment(&config(&dir, "4294950911\n", "4.4.0-21\n")).await;

        assert!(!report.overdrive_enabled);
        assert!(!report.kernel_supported);
        assert_eq!(report.kernel_release.as_deref(), Some("4.4.0-21"));
        assert!(!report.is_ready());
    }

    #[tokio::test]
    async fn missing_files_are_findings() {
        let config = InventoryConfig {
            featuremask_path: "/nonexistent/ppfeaturemask".into(),
            osrelease_path: "/nonexistent/osrelease".into(),
            dpkg_command: "surely-not-an-installed-dpkg".to_string(),
            ..Default::default()
        };

        let report = check_environment(&config).await;

        assert_eq!(report.findings.len(), 3);
        assert_eq!(report.featuremask, None);
        assert_eq!(report.kernel_release, None);
    }
}

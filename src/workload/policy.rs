//! Per-workload policy overrides declared through container environment.
//!
//! Values are matched case-insensitively against `yes` and `true` after
//! trimming whitespace, so `TRUE`, `Yes` and ` true ` all enable a flag.

use super::ContainerImage;

/// Env var that suppresses automatic Service/Ingress creation.
pub const NO_AUTO_EXPOSURE_ENV: &str = "NO_AUTO_CREATION";
/// Env var that forces admission to allow a workload regardless of findings.
pub const BYPASS_CVE_DENIAL_ENV: &str = "BYPASS_CVE_DENIED";

/// Flags derived from the env of every container, init or main.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolicyFlags {
    pub no_auto_exposure: bool,
    pub bypass_cve_denial: bool,
}

impl PolicyFlags {
    /// A flag is set if any container declares it with an enabled value.
    pub fn from_containers<'a>(containers: impl IntoIterator<Item = &'a ContainerImage>) -> Self {
        let mut flags = Self::default();
        for container in containers {
            flags.no_auto_exposure |= declares(container, NO_AUTO_EXPOSURE_ENV);
            flags.bypass_cve_denial |= declares(container, BYPASS_CVE_DENIAL_ENV);
        }
        flags
    }
}

fn declares(container: &ContainerImage, var: &str) -> bool {
    container
        .env
        .get(var)
        .is_some_and(|value| is_enabled_value(value))
}

/// Whether an env value turns a policy flag on.
pub fn is_enabled_value(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true")
}

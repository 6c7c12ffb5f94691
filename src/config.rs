use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Set up application processors in one pass once they are all online,
    /// instead of one at a time as they come up.
    pub defer_ap_init: bool,
    /// Expected number of processors, for preallocation.
    pub max_cpus: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            defer_ap_init: true,
            max_cpus: 64,
        }
    }
}

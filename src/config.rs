use serde::{Deserialize, Serialize};

use crate::model::DEFAULT_BRANCH_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub branch: BranchConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    pub default_branch_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Page size applied to diff queries when the caller does not paginate.
    pub page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            branch: BranchConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            default_branch_name: DEFAULT_BRANCH_NAME.to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { page_size: 1000 }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file, and
    /// `GRAPHVC_`-prefixed environment variables, in that order.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        config = config.add_source(
            config::Environment::with_prefix("GRAPHVC")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.branch.default_branch_name, DEFAULT_BRANCH_NAME);
        assert_eq!(config.query.page_size, 1000);
    }
}

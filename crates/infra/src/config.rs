use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub directory_base_url: String,
    /// Comma-separated `project=mail.domain` pairs seeding the project
    /// reader until the real project catalog is wired in.
    pub project_domains: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("directory_base_url", "http://127.0.0.1:8090")?
            .set_default("project_domains", "demo=demo.example.org")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn project_domain_pairs(&self) -> Vec<(String, String)> {
        self.project_domains
            .split(',')
            .filter_map(|pair| {
                let (project, domain) = pair.split_once('=')?;
                let project = project.trim();
                let domain = domain.trim();
                if project.is_empty() || domain.is_empty() {
                    return None;
                }
                Some((project.to_string(), domain.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_domain_pairs_skip_malformed_entries() {
        let config = AppConfig {
            app_env: "test".to_string(),
            port: 0,
            log_level: "info".to_string(),
            data_backend: "memory".to_string(),
            directory_base_url: String::new(),
            project_domains: "p1=one.org, p2 = two.org ,broken,=x".to_string(),
        };
        assert_eq!(
            config.project_domain_pairs(),
            vec![
                ("p1".to_string(), "one.org".to_string()),
                ("p2".to_string(), "two.org".to_string()),
            ]
        );
    }
}

use std::{collections::HashMap, fs};

#[derive(Debug, PartialEq)]
pub struct Settings {
    pub log_filter: String,
    pub seed_file: Option<String>,
    pub sort_column: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            seed_file: None,
            sort_column: "fqdn".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        apply_file(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("CONSOLE_LOG_FILTER") {
        settings.log_filter = v;
    }
    if let Ok(v) = std::env::var("CONSOLE_SEED_FILE") {
        settings.seed_file = Some(v);
    }
    if let Ok(v) = std::env::var("CONSOLE_SORT_COLUMN") {
        settings.sort_column = v;
    }

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
        if let Some(v) = file_cfg.get("log_filter") {
            settings.log_filter = v.clone();
        }
        if let Some(v) = file_cfg.get("seed_file") {
            settings.seed_file = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("sort_column") {
            settings.sort_column = v.clone();
        }
    }
}

use std::io::IsTerminal;

use crate::core::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub use_color: bool,
    pub verbose: bool,
}

impl OutputOptions {
    /// Combine command-line flags with the `[settings]` section. Flags win.
    pub fn resolve(json: bool, pretty: bool, no_color: bool, verbose: bool, settings: &Settings) -> Self {
        let format = if json || settings.default_format == "json" {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        };
        let use_color = match settings.color.as_str() {
            _ if no_color => false,
            "never" => false,
            "always" => true,
            _ => detect_color(true),
        };
        Self {
            format,
            pretty,
            use_color,
            verbose,
        }
    }
}

pub fn detect_color(color_flag: bool) -> bool {
    if !color_flag {
        return false;
    }
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_overrides_settings() {
        let opts = OutputOptions::resolve(true, false, true, false, &Settings::default());
        assert_eq!(opts.format, OutputFormat::Json);
        assert!(!opts.use_color);
    }

    #[test]
    fn settings_select_format_and_color() {
        let settings = Settings {
            default_format: "json".to_string(),
            color: "always".to_string(),
        };
        let opts = OutputOptions::resolve(false, true, false, false, &settings);
        assert_eq!(opts.format, OutputFormat::Json);
        assert!(opts.use_color);
        assert!(opts.pretty);

        let opts = OutputOptions::resolve(false, false, true, false, &settings);
        assert!(!opts.use_color);
    }
}

use gavel_config::BrowserSettings;

/// Construct Chrome command-line arguments for a scraping session.
pub fn build_launch_arguments(settings: &BrowserSettings) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--disable-popup-blocking".to_string(),
        format!(
            "--window-size={},{}",
            settings.window_width, settings.window_height
        ),
        format!("--lang={}", settings.lang),
    ];
    if !settings.sandbox {
        args.push("--no-sandbox".to_string());
    }
    if settings.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    args.extend(settings.extra_args.iter().cloned());
    args
}

/// JavaScript evasions applied after each navigation.
pub struct StealthScripts;

impl StealthScripts {
    pub fn core_evasions() -> &'static str {
        r#"
            Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
            Object.defineProperty(navigator, 'languages', { get: () => ['ko-KR', 'ko', 'en-US'] });
            if (!window.chrome) window.chrome = { runtime: {} };
            return true;
        "#
    }
}

use rand::Rng;
use sitescan_core::BrowserConfig;

/// Identity a page presents to the sites it loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProfile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

impl PageProfile {
    /// Configured viewport with a common desktop user agent.
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            user_agent: Self::random_user_agent(),
            viewport_width: config.window_width,
            viewport_height: config.window_height,
        }
    }

    /// Replace the user agent; blank values are ignored.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        if !user_agent.trim().is_empty() {
            self.user_agent = user_agent.trim().to_string();
        }
        self
    }

    /// A randomized desktop profile.
    pub fn randomized() -> Self {
        let viewports = [(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];
        let (width, height) = viewports[rand::thread_rng().gen_range(0..viewports.len())];

        Self {
            user_agent: Self::random_user_agent(),
            viewport_width: width,
            viewport_height: height,
        }
    }

    fn random_user_agent() -> String {
        let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
        USER_AGENTS[idx].to_string()
    }
}

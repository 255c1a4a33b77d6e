use std::time::Duration;

use chrono::FixedOffset;
use clap::Parser;

use crate::error::CalendarError;
use crate::models::WorkCalendar;

/// Command line arguments. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "devops-relay")]
#[command(about = "REST relay for Azure DevOps projects, work items and time in state")]
pub struct Config {
    /// Organization URL, e.g. https://dev.azure.com/acme
    #[arg(long, env = "AZURE_DEVOPS_ORG_URL")]
    pub org_url: String,

    /// Personal access token used for Basic auth.
    #[arg(long, env = "AZURE_DEVOPS_PERSONAL_ACCESS_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Graph API base URL. Defaults to https://vssps.dev.azure.com/<org>.
    #[arg(long, env = "AZURE_DEVOPS_GRAPH_URL")]
    pub graph_url: Option<String>,

    /// Bind address for the HTTP server.
    #[arg(long, default_value = "127.0.0.1", env = "BIND_ADDR")]
    pub bind: String,

    /// HTTP port to listen on.
    #[arg(short, long, default_value_t = 3000, env = "PORT")]
    pub port: u16,

    /// Working weekdays, 0 = Sunday .. 6 = Saturday.
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4,5,6", env = "WORK_DAYS")]
    pub work_days: Vec<u32>,

    #[arg(long, default_value_t = 11, env = "WORK_START_HOUR")]
    pub work_start_hour: u32,

    #[arg(long, default_value_t = 19, env = "WORK_END_HOUR")]
    pub work_end_hour: u32,

    /// Offset the work hours are expressed in, as +HH:MM or -HH:MM.
    #[arg(long, default_value = "+00:00", env = "WORK_UTC_OFFSET", allow_hyphen_values = true)]
    pub utc_offset: String,

    /// Timeout for each upstream request.
    #[arg(long, default_value_t = 30, env = "UPSTREAM_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn work_calendar(&self) -> Result<WorkCalendar, CalendarError> {
        let offset = parse_utc_offset(&self.utc_offset)
            .ok_or_else(|| CalendarError::InvalidOffset(self.utc_offset.clone()))?;
        WorkCalendar::new(
            self.work_days.iter().copied(),
            self.work_start_hour,
            self.work_end_hour,
            offset,
        )
    }

    pub fn org_url(&self) -> &str {
        self.org_url.trim_end_matches('/')
    }

    pub fn graph_url(&self) -> String {
        match &self.graph_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let org = self.org_url().rsplit('/').next().unwrap_or_default();
                format!("https://vssps.dev.azure.com/{org}")
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Parse a "+HH:MM" / "-HH:MM" string into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["devops-relay", "--org-url", "https://dev.azure.com/acme/", "--token", "t"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_office_calendar() {
        let cfg = parse(&[]);
        let cal = cfg.work_calendar().unwrap();
        assert_eq!(cal.work_days().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!((cal.start_hour(), cal.end_hour()), (11, 19));
        assert_eq!(cal.offset(), FixedOffset::east_opt(0).unwrap());
        assert_eq!(cfg.port, 3000);
    }

    #[test]
    fn graph_url_derives_from_org() {
        let cfg = parse(&[]);
        assert_eq!(cfg.org_url(), "https://dev.azure.com/acme");
        assert_eq!(cfg.graph_url(), "https://vssps.dev.azure.com/acme");

        let cfg = parse(&["--graph-url", "https://graph.example/"]);
        assert_eq!(cfg.graph_url(), "https://graph.example");
    }

    #[test]
    fn custom_calendar_flags() {
        let cfg = parse(&[
            "--work-days",
            "1,2,3,4,5",
            "--work-start-hour",
            "9",
            "--work-end-hour",
            "17",
            "--utc-offset",
            "-05:30",
        ]);
        let cal = cfg.work_calendar().unwrap();
        assert_eq!(cal.work_days().count(), 5);
        assert_eq!(cal.offset().local_minus_utc(), -(5 * 3600 + 30 * 60));
    }

    #[test]
    fn bad_offset_is_reported() {
        let cfg = parse(&["--utc-offset", "0530"]);
        assert_eq!(
            cfg.work_calendar(),
            Err(CalendarError::InvalidOffset("0530".to_string()))
        );
    }

    #[test]
    fn offset_parsing() {
        assert_eq!(parse_utc_offset("+09:00").map(|o| o.local_minus_utc()), Some(32400));
        assert_eq!(parse_utc_offset("Z").map(|o| o.local_minus_utc()), Some(0));
        assert_eq!(parse_utc_offset("+24:00"), None);
        assert_eq!(parse_utc_offset("09:00"), None);
        assert_eq!(parse_utc_offset(""), None);
    }
}

use crate::plugins::driver::DriverContext;
use clap::{Arg, ArgAction, ArgMatches, Command};

/// HTTP transport flags for the `download` subcommand.
pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }

    pub fn augment_download_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("http_header")
                .long("header")
                .help_heading("HTTP")
                .help("Header sent with the probe and every range request, as 'Name: value' (repeatable)")
                .action(ArgAction::Append)
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .help_heading("HTTP")
                .help("User-Agent for the probe and range requests")
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_secs")
                .long("timeout-secs")
                .help_heading("HTTP")
                .help("Timeout in seconds for opening a request and for each body read")
                .default_value("60")
                .num_args(1),
        )
        .arg(
            Arg::new("http_retries")
                .long("retries")
                .help_heading("HTTP")
                .help("How many times a failed range (or sub-range) is re-requested before the download aborts")
                .default_value("0")
                .num_args(1),
        )
        .arg(
            Arg::new("http_retry_backoff_ms")
                .long("retry-backoff-ms")
                .help_heading("HTTP")
                .help("Delay before the first re-request of a range; doubles per attempt, capped at 30s")
                .default_value("400")
                .num_args(1),
        )
    }

    pub fn apply_download_matches(&self, matches: &ArgMatches, ctx: &mut DriverContext) -> anyhow::Result<()> {
        if let Some(ua) = matches.get_one::<String>("http_user_agent") {
            ctx.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("http_timeout_secs") {
            ctx.timeout_secs = s.parse()?;
            if ctx.timeout_secs == 0 {
                anyhow::bail!("--timeout-secs must be greater than 0");
            }
        }
        if let Some(s) = matches.get_one::<String>("http_retries") {
            ctx.retries = s.parse()?;
        }
        if let Some(s) = matches.get_one::<String>("http_retry_backoff_ms") {
            ctx.retry_backoff_ms = s.parse()?;
        }

        if let Some(values) = matches.get_many::<String>("http_header") {
            for h in values {
                let (k, v) = h
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid header format: {}", h))?;
                ctx.headers.insert(k.trim().to_string(), v.trim().to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<DriverContext> {
        let plugin = HttpCliPlugin::new();
        let cmd = plugin.augment_download_command(Command::new("download"));
        let m = cmd.try_get_matches_from(std::iter::once("download").chain(args.iter().copied()))?;
        let mut ctx = DriverContext::default();
        plugin.apply_download_matches(&m, &mut ctx)?;
        Ok(ctx)
    }

    #[test]
    fn defaults_keep_context() {
        let ctx = parse(&[]).unwrap();
        assert_eq!(ctx.timeout_secs, 60);
        assert_eq!(ctx.retries, 0);
        assert_eq!(ctx.retry_backoff_ms, 400);
        assert!(ctx.headers.is_empty());
        assert_eq!(ctx.user_agent, DriverContext::default().user_agent);
    }

    #[test]
    fn headers_and_tuning_are_applied() {
        let ctx = parse(&[
            "--header",
            "Authorization: Bearer t",
            "--header",
            "X-Trace:1",
            "--retries",
            "3",
            "--user-agent",
            "probe/1.0",
        ])
        .unwrap();
        assert_eq!(ctx.headers.get("Authorization").map(String::as_str), Some("Bearer t"));
        assert_eq!(ctx.headers.get("X-Trace").map(String::as_str), Some("1"));
        assert_eq!(ctx.retries, 3);
        assert_eq!(ctx.user_agent, "probe/1.0");
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(parse(&["--header", "no-colon"]).is_err());
        assert!(parse(&["--timeout-secs", "0"]).is_err());
    }
}

use crate::cli::args::CliArgs;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if args.concurrency == Some(0) {
        return Err("invalid concurrency, expected at least 1".to_string());
    }
    if args.workers == Some(0) {
        return Err("invalid workers, expected at least 1".to_string());
    }
    if args.timeout == Some(0) {
        return Err("invalid timeout, expected at least 1 second".to_string());
    }
    if let Some(raw) = args.header.as_deref() {
        crate::probe::parse_header(raw).map_err(|e| format!("invalid --header: {e}"))?;
    }
    if let Some(raw) = args.output_format.as_deref() {
        if crate::output::OutputFormat::parse(raw).is_none() {
            return Err(format!(
                "invalid --output-format '{raw}', expected text or json"
            ));
        }
    }
    if let Some(ua) = args.user_agent.as_deref() {
        if ua.trim().is_empty() {
            return Err("invalid --user-agent, expected a non-empty value".to_string());
        }
    }
    Ok(())
}

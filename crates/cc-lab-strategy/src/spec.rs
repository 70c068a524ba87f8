use cc_lab_abstract::ConfigError;

use crate::{AimdParams, LossResponse, StrategyDescriptor};

/// Parse a strategy descriptor of the form `name[:options]`.
///
/// * `fixed:<window>`
/// * `aimd` or `aimd:cwnd=<n>,ssthresh=<n>,dup=<n>,reset=<threshold|one>`
pub fn parse_strategy(spec: &str) -> Result<StrategyDescriptor, ConfigError> {
    let spec = spec.trim();
    let (name, options) = match spec.split_once(':') {
        Some((name, options)) => (name, Some(options)),
        None => (spec, None),
    };

    match name {
        "fixed" => {
            let window = options
                .ok_or_else(|| invalid(spec, "expected fixed:<window>"))?
                .trim()
                .parse::<u64>()
                .map_err(|e| invalid(spec, &format!("window: {e}")))?;
            if window == 0 {
                return Err(ConfigError::ZeroWindow);
            }
            Ok(StrategyDescriptor::Fixed { window })
        }
        "aimd" => {
            let mut params = AimdParams::default();
            for option in options.into_iter().flat_map(|o| o.split(',')) {
                let option = option.trim();
                if option.is_empty() {
                    continue;
                }
                let (key, value) = option
                    .split_once('=')
                    .ok_or_else(|| invalid(spec, &format!("option '{option}' is not key=value")))?;
                apply_aimd_option(&mut params, key.trim(), value.trim())
                    .map_err(|reason| invalid(spec, &reason))?;
            }
            if params.initial_cwnd == 0 {
                return Err(ConfigError::ZeroWindow);
            }
            Ok(StrategyDescriptor::Aimd(params))
        }
        other => Err(invalid(
            spec,
            &format!("unknown strategy '{other}'. Try 'fixed:<window>' or 'aimd'."),
        )),
    }
}

fn apply_aimd_option(params: &mut AimdParams, key: &str, value: &str) -> Result<(), String> {
    let number = |v: &str| v.parse::<u64>().map_err(|e| format!("{key}: {e}"));
    match key {
        "cwnd" => params.initial_cwnd = number(value)?,
        "ssthresh" => params.initial_ssthresh = number(value)?.max(1),
        "dup" => {
            params.dup_ack_threshold = u32::try_from(number(value)?.max(1))
                .map_err(|_| format!("{key}: value too large"))?
        }
        "reset" => {
            params.loss_response = match value {
                "threshold" => LossResponse::ResetToThreshold,
                "one" => LossResponse::ResetToOne,
                other => return Err(format!("reset must be 'threshold' or 'one', got '{other}'")),
            }
        }
        other => return Err(format!("unknown option '{other}'")),
    }
    Ok(())
}

fn invalid(spec: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidStrategy {
        spec: spec.to_string(),
        reason: reason.to_string(),
    }
}

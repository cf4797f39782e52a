use std::env;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use ems_serio::{mask_from_bits, Config, Driver, LogCategory, LogMask, PacketQueue};

fn parse_mask(arg: &str) -> Result<LogMask> {
    let bits = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => arg.parse(),
    }
    .with_context(|| format!("Invalid log mask {}", arg))?;
    Ok(mask_from_bits(bits))
}

/// Queue every hex encoded line of stdin for transmission.
fn forward_stdin(outbound: PacketQueue) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Could not read stdin: {}", e);
                return;
            }
        };
        let digits: String = line.split_whitespace().collect();
        if digits.is_empty() {
            continue;
        }
        match hex::decode(&digits) {
            Ok(telegram) => {
                if let Err(e) = outbound.try_send(&telegram) {
                    log::error!("TX: {}", e);
                }
            }
            Err(e) => log::error!("Ignored {:?}: {}", line, e),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace")).init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "ems-serio".into());
    let port = match args.next() {
        Some(port) => port,
        None => {
            println!("Usage: {} <tty> [logmask]", program);
            return Ok(());
        }
    };

    let mut config = Config::default();
    if let Some(mask) = args.next() {
        config.log_mask = parse_mask(&mask)?;
    }

    let mut driver = Driver::new(config);
    driver.set_log_mask(config.log_mask);
    driver.start(&port)?;

    let stop = driver.stop_handle();
    ctrlc::set_handler(move || stop.stop()).context("Could not install signal handler")?;

    let (outbound, inbound) = driver.queues().context("Driver has no queues")?;
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || forward_stdin(outbound))
        .context("Could not start stdin reader")?;

    while driver.is_running() {
        if let Some(telegram) = inbound.recv_timeout(Duration::from_millis(100)) {
            println!("{}", hex::encode(&telegram[..]));
        }
    }
    driver.join();

    if driver.log_mask().contains(LogCategory::Info) {
        log::info!("{}", driver.statistics());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mask() {
        assert_eq!(parse_mask("3").unwrap(), LogCategory::Error | LogCategory::Info);
        assert_eq!(parse_mask("0x18").unwrap(), LogCategory::Packet | LogCategory::Token);
        assert_eq!(parse_mask("0XFF").unwrap(), LogMask::all());
        assert!(parse_mask("banana").is_err());
    }
}

//! Simulated weather: a blocking computation and a push stream.

use serde::Serialize;
use std::time::Duration;
use wirebridge_core::{
    Args, ChannelSender, Command, CommandError, Describe, EnumDef, ErrorCode, RecordDef,
    RegistryBuilder, TypeDescriptor,
};

const MAX_FORECAST_DAYS: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Conditions {
    Sunny,
    Cloudy,
    Rain,
    Snow,
}

impl Describe for Conditions {
    fn describe() -> TypeDescriptor {
        EnumDef::new("Conditions", ["sunny", "cloudy", "rain", "snow"]).into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub city: String,
    pub sequence: u32,
    pub temperature_c: f64,
    pub conditions: Conditions,
}

impl Describe for Reading {
    fn describe() -> TypeDescriptor {
        RecordDef::new("Reading")
            .describe("One weather observation.")
            .field::<String>("city")
            .field::<u32>("sequence")
            .field::<f64>("temperature_c")
            .doc("Degrees Celsius")
            .field::<Conditions>("conditions")
            .into()
    }
}

/// Deterministic pseudo-reading so the demo needs no network.
pub fn reading(city: &str, sequence: u32) -> Reading {
    let seed = city
        .bytes()
        .fold(17u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)))
        .wrapping_add(u64::from(sequence).wrapping_mul(7919));
    let conditions = match (seed / 7) % 4 {
        0 => Conditions::Sunny,
        1 => Conditions::Cloudy,
        2 => Conditions::Rain,
        _ => Conditions::Snow,
    };
    Reading {
        city: city.to_string(),
        sequence,
        temperature_c: (seed % 400) as f64 / 10.0 - 5.0,
        conditions,
    }
}

fn forecast(city: &str, days: u32) -> Result<Vec<Reading>, CommandError> {
    if days == 0 || days > MAX_FORECAST_DAYS {
        return Err(
            CommandError::new(format!("days must be between 1 and {MAX_FORECAST_DAYS}"))
                .with_code(ErrorCode::InvalidArgument),
        );
    }
    Ok((0..days).map(|day| reading(city, day)).collect())
}

async fn updates(args: Args, tx: ChannelSender) -> Result<(), CommandError> {
    let city: String = args.get("city")?;
    let interval = Duration::from_millis(args.get_or("interval_ms", 1000u64)?);
    let count: Option<u32> = args.get("count")?;

    let mut sequence = 0;
    while count.is_none_or(|count| sequence < count) {
        tx.send(reading(&city, sequence)).await?;
        sequence += 1;
        tokio::select! {
            _ = tx.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("Weather updates for {} stopped after {}", city, sequence);
    Ok(())
}

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .command(
            Command::unary("get_forecast")
                .module("weather")
                .describe("Daily forecast for a city.")
                .param::<String>("city")
                .param_with_default::<u32>("days")
                .returns::<Vec<Reading>>()
                .blocking_handler(|args: Args| {
                    forecast(&args.get::<String>("city")?, args.get_or("days", 3)?)
                }),
        )
        .command(
            Command::stream("weather_updates")
                .module("weather")
                .describe("Live readings for a city until closed.")
                .param::<String>("city")
                .param_with_default::<u64>("interval_ms")
                .param::<Option<u32>>("count")
                .yields::<Reading>()
                .stream_handler(updates),
        )
}

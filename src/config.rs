use std::{path::PathBuf, time::Duration};

use anyhow::{Result, ensure};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use getset::CopyGetters;
use serde::{Deserialize, Serialize};

use crate::{
    bridge::BridgeSettings, discovery::DeviceTarget, filter::FilterSettings, physical::GrabPolicy,
};

const ENV_PREFIX: &str = "SCUF_BRIDGE_";

// Corsair, parent company of SCUF
const SCUF_VENDOR_ID: u16 = 0x1b1c;
const SCUF_PRODUCT_ID_WIRED: u16 = 0x3a05;
const SCUF_PRODUCT_ID_RECEIVER: u16 = 0x3a09;

#[derive(Debug, Parser, Serialize, Deserialize, CopyGetters)]
pub struct Config {
    /// The path of config file
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    path: Option<PathBuf>,

    #[getset(get_copy = "pub")]
    #[arg(long, default_missing_value = "true")]
    log_timestamp: bool,

    #[arg(skip = SCUF_VENDOR_ID)]
    vendor_id: u16,

    /// One per hardware variant: wired controller and wireless receiver
    #[arg(skip = vec![SCUF_PRODUCT_ID_WIRED, SCUF_PRODUCT_ID_RECEIVER])]
    product_ids: Vec<u16>,

    /// Radial stick deadzone, as a fraction of full deflection
    #[arg(skip = 0.107f64)]
    stick_deadzone: f64,

    #[arg(skip = 64i32)]
    jitter_threshold: i32,

    #[arg(skip = 10i32)]
    trigger_deadzone: i32,

    #[arg(skip = 60u64)]
    reconnect_timeout_secs: u64,

    #[arg(skip = 2u64)]
    poll_interval_secs: u64,

    #[arg(skip = 3u32)]
    grab_retries: u32,

    #[arg(skip = 500u64)]
    grab_retry_delay_ms: u64,

    /// Grab the consumer-control and other side interfaces too
    #[arg(skip = true)]
    grab_auxiliary: bool,
}

impl Config {
    pub fn parse() -> Result<Self> {
        <Config as Parser>::parse().fill()
    }

    fn fill(self) -> Result<Self> {
        let file_data = if let Some(path) = &self.path {
            Toml::file(path)
        } else {
            Toml::string("")
        };
        let config: Self = Figment::new()
            .merge(Serialized::defaults(self))
            .merge(file_data)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.product_ids.is_empty(),
            "At least one product id is required"
        );
        ensure!(
            (0.0..1.0).contains(&self.stick_deadzone),
            "stick_deadzone must be in [0, 1), got {}",
            self.stick_deadzone
        );
        ensure!(
            self.jitter_threshold >= 0,
            "jitter_threshold must not be negative"
        );
        ensure!(
            self.trigger_deadzone >= 0,
            "trigger_deadzone must not be negative"
        );
        ensure!(
            self.poll_interval_secs > 0,
            "poll_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn device_target(&self) -> DeviceTarget {
        DeviceTarget {
            vendor: self.vendor_id,
            products: self.product_ids.clone(),
        }
    }

    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            stick_deadzone: self.stick_deadzone,
            jitter_threshold: self.jitter_threshold,
            trigger_deadzone: self.trigger_deadzone,
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            reconnect_timeout: Duration::from_secs(self.reconnect_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    pub fn grab_policy(&self) -> GrabPolicy {
        GrabPolicy {
            retries: self.grab_retries,
            retry_delay: Duration::from_millis(self.grab_retry_delay_ms),
            auxiliary: self.grab_auxiliary,
        }
    }
}

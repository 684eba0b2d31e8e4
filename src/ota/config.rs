use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocols::zip::EnvelopeFlags;

use super::types::AckPolicy;

pub const CONTROLLER_PORT: u16 = 4123;
pub const DEFAULT_FIRMWARE_ID: u16 = 0x0402;

/// Settings for one firmware transfer to a node.
#[derive(Debug, Clone)]
pub struct OtaConfig {
    pub node_id: Option<u16>,
    pub port: u16,
    pub vendor_id: u16,
    pub firmware_id: u16,
    pub firmware_target: u8,
    pub hw_version: u8,
    pub secure: bool,
    pub request_timeout: Duration,
    pub ack_timeout: Duration,
    pub report_interval: Duration,
    pub ack_policy: AckPolicy,
    pub activate: bool,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            port: CONTROLLER_PORT,
            vendor_id: 0,
            firmware_id: DEFAULT_FIRMWARE_ID,
            firmware_target: 0,
            hw_version: 0x01,
            secure: true,
            request_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(5),
            report_interval: Duration::from_millis(50),
            ack_policy: AckPolicy::Assume,
            activate: false,
        }
    }
}

impl OtaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node_id: u16) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn with_firmware_id(mut self, firmware_id: u16) -> Self {
        self.firmware_id = firmware_id;
        self
    }

    pub fn with_target(mut self, target: u8) -> Self {
        self.firmware_target = target;
        self
    }

    pub fn with_hw_version(mut self, hw_version: u8) -> Self {
        self.hw_version = hw_version;
        self
    }

    pub fn with_security(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn activate(mut self) -> Self {
        self.activate = true;
        self
    }

    pub fn flags(&self) -> EnvelopeFlags {
        EnvelopeFlags::controller(self.secure)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Configuration("chunk request timeout must be non-zero".into()));
        }

        if self.ack_policy == AckPolicy::Require && self.ack_timeout.is_zero() {
            return Err(Error::Configuration(
                "ack timeout must be non-zero when acknowledgment is required".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_conventions() {
        let config = OtaConfig::new();
        assert_eq!(config.port, 4123);
        assert_eq!(config.firmware_id, 0x0402);
        assert_eq!(config.flags(), EnvelopeFlags::new(0x00, 0x50));
        assert_eq!(config.ack_policy, AckPolicy::Assume);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_and_validation() {
        let config = OtaConfig::new()
            .with_node(7)
            .with_security(false)
            .with_ack_policy(AckPolicy::Require)
            .with_ack_timeout(Duration::ZERO);
        assert_eq!(config.node_id, Some(7));
        assert_eq!(config.flags(), EnvelopeFlags::new(0x00, 0x40));
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = OtaConfig::new().with_request_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}

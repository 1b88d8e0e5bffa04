//! Driver registry: configuration-time driver selection.
//!
//! The composition root registers every factory it links, then builds
//! devices from TOML tables:
//!
//! ```toml
//! [devices.spectrometer]
//! type = "hr640"
//! port = "/dev/ttyUSB0"
//! calibration_file = "/var/lib/mono/spectralink.cal"
//! position_file = "/var/lib/mono/spectralink.pos"
//! ```
//!
//! The `type` field selects the factory; the factory validates the rest of
//! the table before the serial port is touched.

use anyhow::{anyhow, Result};
use mono_core::driver::{DeviceComponents, DriverFactory};
use std::collections::HashMap;

/// Maps driver `type` strings to their factories.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<&'static str, Box<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver factory under its `driver_type()`.
    pub fn register_factory(&mut self, factory: Box<dyn DriverFactory>) {
        let driver_type = factory.driver_type();
        if self.factories.insert(driver_type, factory).is_some() {
            tracing::warn!(driver_type, "replacing previously registered driver factory");
        }
    }

    /// The registered driver type names, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Look up a factory by driver type.
    pub fn factory(&self, driver_type: &str) -> Option<&dyn DriverFactory> {
        self.factories.get(driver_type).map(Box::as_ref)
    }

    /// Build a device from a configuration table.
    ///
    /// The table's `type` field selects the factory; the factory validates
    /// the configuration and opens the connection.
    pub async fn build_device(&self, config: toml::Value) -> Result<DeviceComponents> {
        let driver_type = config
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("device config is missing its 'type' field"))?;

        let factory = self.factories.get(driver_type).ok_or_else(|| {
            anyhow!(
                "unknown driver type {:?} (registered: {:?})",
                driver_type,
                self.driver_types()
            )
        })?;

        factory.validate(&config)?;
        factory.build(config).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use mono_core::capabilities::GratingDrive;
    use mono_core::driver::Capability;
    use std::sync::Arc;

    struct MockDrive;

    #[async_trait]
    impl GratingDrive for MockDrive {
        async fn move_to_nm(&self, _wavelength_nm: f64) -> Result<()> {
            Ok(())
        }

        async fn read_position_nm(&self) -> Result<f64> {
            Ok(500.0)
        }

        async fn is_busy(&self) -> Result<bool> {
            Ok(false)
        }
    }

    struct MockFactory;

    impl DriverFactory for MockFactory {
        fn driver_type(&self) -> &'static str {
            "mock_mono"
        }

        fn name(&self) -> &'static str {
            "Mock Monochromator"
        }

        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::GratingDrive]
        }

        fn validate(&self, config: &toml::Value) -> Result<()> {
            if config.get("port").is_none() {
                return Err(anyhow!("missing 'port' field"));
            }
            Ok(())
        }

        fn build(&self, _config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
            Box::pin(async {
                Ok(DeviceComponents::new().with_grating_drive(Arc::new(MockDrive)))
            })
        }
    }

    fn table(text: &str) -> toml::Value {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_build_device_by_type() {
        let mut registry = DriverRegistry::new();
        registry.register_factory(Box::new(MockFactory));

        let config = table("type = \"mock_mono\"\nport = \"/dev/null\"");

        let components = registry.build_device(config).await.unwrap();
        assert_eq!(components.capabilities(), vec![Capability::GratingDrive]);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let registry = DriverRegistry::new();
        let config = table("type = \"hr9000\"");

        let err = registry.build_device(config).await.unwrap_err();
        assert!(err.to_string().contains("unknown driver type"));
    }

    #[tokio::test]
    async fn test_missing_type_is_rejected() {
        let registry = DriverRegistry::new();
        let config = table("port = \"/dev/ttyUSB0\"");

        let err = registry.build_device(config).await.unwrap_err();
        assert!(err.to_string().contains("'type'"));
    }

    #[tokio::test]
    async fn test_validation_runs_before_build() {
        let mut registry = DriverRegistry::new();
        registry.register_factory(Box::new(MockFactory));

        let config = table("type = \"mock_mono\"");

        let err = registry.build_device(config).await.unwrap_err();
        assert!(err.to_string().contains("port"));
    }
}

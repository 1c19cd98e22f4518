use tracing::info;

use super::client::ClientFactory;
use super::client::RemoteClient;
use super::credentials::probe;
use super::error::Error;
use super::error::Result;
use super::settings::Credentials;
use super::settings::DeviceSettings;

/// Version stamped into the settings of newly paired devices.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check a new set of credentials before a device is added.
///
/// `registered` lists the serial numbers of devices that already exist. The
/// probe client is always released; the returned settings are ready to be
/// persisted.
pub async fn pair<'a, F: ClientFactory>(
    factory: &F,
    credentials: Credentials,
    registered: impl IntoIterator<Item = &'a str>,
) -> Result<DeviceSettings> {
    let serial_number = credentials.serial_number.clone();
    if registered.into_iter().any(|s| s == serial_number) {
        return Err(Error::Duplicate(serial_number));
    }

    let mut settings = DeviceSettings::new(credentials);
    settings.validate().map_err(Error::InvalidSettings)?;

    info!("Validating credentials for {}", serial_number);
    let client = probe(factory, &settings.credentials).await?;
    client.end().await;

    settings.paired_with_app_version = Some(APP_VERSION.to_string());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::super::client::ClientError;
    use super::super::client::mock::MockClientFactory;
    use super::super::client::mock::MockRemoteClient;
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            serial_number: "123456789".to_string(),
            access_key: "abcdefghijklmnop".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pair_stamps_version_and_releases_client() {
        let client = MockRemoteClient::new();
        let factory = MockClientFactory::new(client.clone());

        let settings = pair(&factory, credentials(), ["987654321"]).await.unwrap();

        assert_eq!(settings.paired_with_app_version.as_deref(), Some(APP_VERSION));
        assert_eq!(settings.credentials, credentials());
        assert_eq!(settings.sync_interval, 30);
        assert_eq!(client.calls(), vec!["status"]);
        assert!(client.ended());
    }

    #[tokio::test]
    async fn test_pair_rejects_duplicate_serial() {
        let factory = MockClientFactory::default();

        let err = pair(&factory, credentials(), ["123456789"]).await.unwrap_err();

        assert!(matches!(err, Error::Duplicate(s) if s == "123456789"));
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_pair_wrong_password() {
        let client = MockRemoteClient::new();
        client.with(|s| s.status = Err(ClientError::Decode("invalid utf-8".to_string())));
        let factory = MockClientFactory::new(client.clone());

        let err = pair(&factory, credentials(), ["987654321"]).await.unwrap_err();

        assert!(matches!(err, Error::Credentials));
        assert!(client.ended());
    }

    #[tokio::test]
    async fn test_pair_requires_all_credentials() {
        let factory = MockClientFactory::default();
        let mut creds = credentials();
        creds.password.clear();

        let err = pair(&factory, creds, ["987654321"]).await.unwrap_err();

        assert!(matches!(err, Error::InvalidSettings(_)));
        assert_eq!(factory.connect_count(), 0);
    }
}

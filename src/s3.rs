use anyhow::Result;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::AppConfig;

/// Builds the S3 client for attachment storage. A custom endpoint (MinIO,
/// localstack) switches the client to path-style addressing.
pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region_provider =
        RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
            .or_default_provider();

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.as_ref(),
        config.aws_secret_access_key.as_ref(),
    ) {
        let credentials = Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "propdesk-env",
        );
        loader = loader.credentials_provider(credentials);
    }

    let base_config = loader.load().await;
    let mut s3_config = S3ConfigBuilder::from(&base_config);
    if let Some(endpoint) = &config.aws_endpoint_url {
        s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
    }

    Ok(S3Client::from_conf(s3_config.build()))
}

//! `pulumi-package:index:Publish`: archives the plugin and uploads the release.

use tracing::info;

use super::{require_string, InvokeContext, InvokeHandler, PUBLISH_TOKEN};
use crate::command::CommandSpec;
use crate::error::ProviderError;
use crate::property::{PropertyMap, PropertyValue};
use crate::schema::{FunctionSpec, ObjectTypeSpec, PropertySpec};

/// File name of the provider plugin binary for a package.
pub fn plugin_binary_name(name: &str) -> String {
    format!("pulumi-resource-{}", name)
}

/// File name of the release archive for a package version and platform.
///
/// ```
/// use pulumi_package::invoke::plugin_archive_name;
///
/// assert_eq!(
///     plugin_archive_name("widgets", "0.3.1", "linux-amd64"),
///     "pulumi-resource-widgets-0.3.1-linux-amd64.tar.gz"
/// );
/// ```
pub fn plugin_archive_name(name: &str, version: &str, platform: &str) -> String {
    format!("pulumi-resource-{}-{}-{}.tar.gz", name, version, platform)
}

/// Public URL of an archive served from the bucket's website endpoint.
pub fn release_url(endpoint: &str, archive: &str) -> String {
    format!("{}/{}", endpoint, archive)
}

/// Archives the built plugin and uploads it to an S3 bucket.
///
/// Runs `tar -zcvf <archive> -C <binDir> pulumi-resource-<name>` and then
/// `aws s3 cp <archive> s3://<bucket>`. Returns the release `url`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Publish;

#[async_trait::async_trait]
impl InvokeHandler for Publish {
    fn token(&self) -> &str {
        PUBLISH_TOKEN
    }

    fn spec(&self) -> FunctionSpec {
        FunctionSpec::new()
            .with_description("Archive the provider plugin and upload it as a release.")
            .with_inputs(
                ObjectTypeSpec::new()
                    .with_property("language", PropertySpec::string())
                    .with_required_property(
                        "name",
                        PropertySpec::string().with_description("Name of the package."),
                    )
                    .with_required_property(
                        "version",
                        PropertySpec::string().with_description("Version being released."),
                    )
                    .with_required_property(
                        "serverBucketName",
                        PropertySpec::string().with_description("S3 bucket receiving the archive."),
                    )
                    .with_required_property(
                        "serverBucketWebsiteEndpoint",
                        PropertySpec::string()
                            .with_description("Website endpoint the bucket is served from."),
                    ),
            )
            .with_outputs(ObjectTypeSpec::new().with_required_property(
                "url",
                PropertySpec::string().with_description("Download URL of the published archive."),
            ))
    }

    async fn invoke(&self, ctx: &InvokeContext, args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        let name = require_string(&args, "name")?;
        let version = require_string(&args, "version")?;
        let bucket = require_string(&args, "serverBucketName")?;
        let endpoint = require_string(&args, "serverBucketWebsiteEndpoint")?;

        let config = ctx.config();
        let binary = plugin_binary_name(&name);
        let archive = plugin_archive_name(&name, &version, &config.platform);

        info!(%archive, %bucket, "Publishing release");
        ctx.run(CommandSpec::new("tar").args([
            "-zcvf",
            archive.as_str(),
            "-C",
            config.bin_dir.as_str(),
            binary.as_str(),
        ]))
        .await?;
        ctx.run(CommandSpec::new("aws").args([
            "s3".to_string(),
            "cp".to_string(),
            archive.clone(),
            format!("s3://{}", bucket),
        ]))
        .await?;

        let url = release_url(&endpoint, &archive);
        info!(%url, "Release published");

        let mut result = PropertyMap::new();
        result.insert("url".to_string(), PropertyValue::String(url));
        Ok(result)
    }
}

//! The `Package` component.

use tracing::{debug, info};

use super::{Component, ConstructContext, ConstructResult};
use crate::config::Action;
use crate::error::ProviderError;
use crate::invoke::PUBLISH_TOKEN;
use crate::property::{OutputValue, PropertyMap, PropertyValue};
use crate::schema::{PropertySpec, ResourceSpec};

/// Type token of the `Package` component.
pub const PACKAGE_TOKEN: &str = "pulumi-package:index:Package";

const GET_RESOURCE_TOKEN: &str = "pulumi:pulumi:getResource";

/// A Pulumi package under development.
///
/// Each deployment runs the lifecycle step named by the stack's `action`
/// config. Publishing appends the new release URL to `releases`, which
/// accumulates across deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Package;

#[async_trait::async_trait]
impl Component for Package {
    fn token(&self) -> &str {
        PACKAGE_TOKEN
    }

    fn spec(&self) -> ResourceSpec {
        ResourceSpec::component()
            .with_description("A Pulumi package: scaffolded, generated, built, installed and published from a stack.")
            .with_input(
                "language",
                PropertySpec::string()
                    .plain()
                    .with_description("Language the provider is written in."),
            )
            .with_input(
                "name",
                PropertySpec::string().plain().with_description("Name of the package."),
            )
            .with_input(
                "serverBucketName",
                PropertySpec::string().with_description("S3 bucket that receives published plugin archives."),
            )
            .with_input(
                "serverBucketWebsiteEndpoint",
                PropertySpec::string().with_description("Website endpoint the release bucket is served from."),
            )
            .with_output(
                "releases",
                PropertySpec::string_array().with_description("Download URLs of every published release."),
            )
    }

    async fn construct(
        &self,
        ctx: &ConstructContext,
        name: &str,
        inputs: PropertyMap,
    ) -> Result<ConstructResult, ProviderError> {
        let urn = ctx.register_component_resource(PACKAGE_TOKEN, name).await?;

        let action: Action = ctx.config().require("action")?.parse()?;
        info!(%urn, %action, "Constructing package");

        let mut args = PropertyMap::new();
        for key in ["name", "language"] {
            if let Some(value) = inputs.get(key) {
                args.insert(key.to_string(), value.clone());
            }
        }

        let mut provenance = Provenance::default();
        let new_release = match action {
            Action::Publish => publish(ctx, &inputs, args, &mut provenance).await?,
            other => {
                ctx.invoke(other.token(), args).await?;
                Release::None
            },
        };

        let releases = match new_release {
            Release::Unknown => {
                debug!(%urn, "Release bucket not known yet; releases are unknown");
                PropertyValue::Computed
            },
            Release::None => PropertyValue::Array(prior_releases(ctx, &urn, &mut provenance).await?),
            Release::Url(url) => {
                let mut releases = prior_releases(ctx, &urn, &mut provenance).await?;
                if !url.is_empty() {
                    releases.push(PropertyValue::String(url));
                }
                PropertyValue::Array(releases)
            },
        };

        let mut state = PropertyMap::new();
        state.insert("releases".to_string(), provenance.wrap(releases));
        ctx.register_resource_outputs(&urn, state.clone()).await?;

        Ok(ConstructResult { urn, state })
    }
}

enum Release {
    None,
    Unknown,
    Url(String),
}

/// Secretness and dependencies a derived value inherits from its sources.
#[derive(Debug, Default)]
struct Provenance {
    secret: bool,
    dependencies: Vec<String>,
}

impl Provenance {
    fn absorb(&mut self, value: &PropertyValue) {
        match value {
            PropertyValue::Secret(inner) => {
                self.secret = true;
                self.absorb(inner);
            },
            PropertyValue::Output(output) => {
                self.secret |= output.secret;
                for dep in &output.dependencies {
                    if !self.dependencies.contains(dep) {
                        self.dependencies.push(dep.clone());
                    }
                }
                if let Some(element) = &output.element {
                    self.absorb(element);
                }
            },
            PropertyValue::Array(items) => items.iter().for_each(|item| self.absorb(item)),
            _ => {},
        }
    }

    fn wrap(self, value: PropertyValue) -> PropertyValue {
        let known = !value.is_computed();
        if !self.dependencies.is_empty() || (self.secret && !known) {
            return PropertyValue::Output(OutputValue {
                element: known.then(|| Box::new(value)),
                known,
                secret: self.secret,
                dependencies: self.dependencies,
            });
        }
        if self.secret {
            PropertyValue::Secret(Box::new(value))
        } else {
            value
        }
    }
}

async fn publish(
    ctx: &ConstructContext,
    inputs: &PropertyMap,
    mut args: PropertyMap,
    provenance: &mut Provenance,
) -> Result<Release, ProviderError> {
    let bucket = input_string(inputs, "serverBucketName", provenance)?;
    let endpoint = input_string(inputs, "serverBucketWebsiteEndpoint", provenance)?;
    let (Some(bucket), Some(endpoint)) = (bucket, endpoint) else {
        return Ok(Release::Unknown);
    };

    let version = ctx.config().require("version")?;
    if ctx.config().is_secret("version") {
        provenance.secret = true;
    }
    args.insert("version".to_string(), PropertyValue::from(version));
    args.insert("serverBucketName".to_string(), PropertyValue::String(bucket));
    args.insert("serverBucketWebsiteEndpoint".to_string(), PropertyValue::String(endpoint));

    let result = ctx.invoke(PUBLISH_TOKEN, args).await?;
    match result.get("url").and_then(PropertyValue::resolved) {
        Some(PropertyValue::String(url)) => Ok(Release::Url(url.clone())),
        _ => Err(ProviderError::InvalidArgument(format!(
            "{} did not return a url",
            PUBLISH_TOKEN
        ))),
    }
}

// `Ok(None)` means the input is present but not known yet.
fn input_string(
    inputs: &PropertyMap,
    key: &str,
    provenance: &mut Provenance,
) -> Result<Option<String>, ProviderError> {
    let Some(value) = inputs.get(key) else {
        return Err(ProviderError::InvalidArgument(format!(
            "publishing requires the '{}' input",
            key
        )));
    };
    provenance.absorb(value);
    match value.resolved() {
        None => Ok(None),
        Some(PropertyValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ProviderError::InvalidArgument(format!(
            "input '{}' must be a string, got {}",
            key,
            other.type_name()
        ))),
    }
}

async fn prior_releases(
    ctx: &ConstructContext,
    urn: &str,
    provenance: &mut Provenance,
) -> Result<Vec<PropertyValue>, ProviderError> {
    let mut args = PropertyMap::new();
    args.insert("urn".to_string(), PropertyValue::from(urn));
    let result = ctx
        .invoke(GET_RESOURCE_TOKEN, args)
        .await
        .map_err(|e| ProviderError::invoke_failed(GET_RESOURCE_TOKEN, e))?;

    let stored = result
        .get("state")
        .and_then(PropertyValue::resolved)
        .and_then(PropertyValue::as_object)
        .and_then(|state| state.get("releases"));
    if let Some(stored) = stored {
        provenance.absorb(stored);
    }

    match stored.and_then(PropertyValue::resolved) {
        None | Some(PropertyValue::Null) => Ok(Vec::new()),
        Some(PropertyValue::Array(items)) => items
            .iter()
            .map(|item| match item.resolved() {
                Some(PropertyValue::String(s)) => Ok(PropertyValue::String(s.clone())),
                _ => Err(ProviderError::InvalidArgument(format!(
                    "{}: releases of {} must be strings",
                    GET_RESOURCE_TOKEN, urn
                ))),
            })
            .collect(),
        Some(other) => Err(ProviderError::InvalidArgument(format!(
            "{}: expected releases to be an array, got {}",
            GET_RESOURCE_TOKEN,
            other.type_name()
        ))),
    }
}

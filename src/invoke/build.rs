//! `pulumi-package:index:Build`: compiles the package with `make build`.

use tracing::info;

use super::{InvokeContext, InvokeHandler, BUILD_TOKEN};
use crate::command::CommandSpec;
use crate::error::ProviderError;
use crate::property::PropertyMap;
use crate::schema::{FunctionSpec, ObjectTypeSpec, PropertySpec};

/// Builds the provider with `make build`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Build;

#[async_trait::async_trait]
impl InvokeHandler for Build {
    fn token(&self) -> &str {
        BUILD_TOKEN
    }

    fn spec(&self) -> FunctionSpec {
        FunctionSpec::new()
            .with_description("Build the provider binary.")
            .with_inputs(
                ObjectTypeSpec::new()
                    .with_property("language", PropertySpec::string())
                    .with_property("name", PropertySpec::string()),
            )
    }

    async fn invoke(&self, ctx: &InvokeContext, _args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        info!("Building provider");
        ctx.run(CommandSpec::new("make").arg("build")).await?;
        Ok(PropertyMap::new())
    }
}

//! `pulumi-package:index:Generate`: regenerates schema and SDKs.

use tracing::info;

use super::{InvokeContext, InvokeHandler, GENERATE_TOKEN};
use crate::command::CommandSpec;
use crate::error::ProviderError;
use crate::property::PropertyMap;
use crate::schema::{FunctionSpec, ObjectTypeSpec, PropertySpec};

/// Regenerates the package SDKs with `make generate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generate;

#[async_trait::async_trait]
impl InvokeHandler for Generate {
    fn token(&self) -> &str {
        GENERATE_TOKEN
    }

    fn spec(&self) -> FunctionSpec {
        FunctionSpec::new()
            .with_description("Regenerate the package SDKs from its schema.")
            .with_inputs(
                ObjectTypeSpec::new()
                    .with_property("language", PropertySpec::string())
                    .with_property("name", PropertySpec::string()),
            )
    }

    async fn invoke(&self, ctx: &InvokeContext, _args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        info!("Generating SDKs");
        ctx.run(CommandSpec::new("make").arg("generate")).await?;
        Ok(PropertyMap::new())
    }
}

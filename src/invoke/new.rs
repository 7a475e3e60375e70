//! `pulumi-package:index:New`: scaffolds a package with the code generation CLI.

use tracing::info;

use super::{require_string, InvokeContext, InvokeHandler, NEW_TOKEN};
use crate::command::CommandSpec;
use crate::error::ProviderError;
use crate::property::PropertyMap;
use crate::schema::{FunctionSpec, ObjectTypeSpec, PropertySpec};

/// Scaffolds a new package with the code generation CLI.
///
/// Runs `<codegenCommand> new <language> <name>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct New;

#[async_trait::async_trait]
impl InvokeHandler for New {
    fn token(&self) -> &str {
        NEW_TOKEN
    }

    fn spec(&self) -> FunctionSpec {
        FunctionSpec::new()
            .with_description("Scaffold a new Pulumi package.")
            .with_inputs(
                ObjectTypeSpec::new()
                    .with_required_property(
                        "language",
                        PropertySpec::string().with_description("Language the provider is written in."),
                    )
                    .with_required_property(
                        "name",
                        PropertySpec::string().with_description("Name of the package."),
                    ),
            )
    }

    async fn invoke(&self, ctx: &InvokeContext, args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        let language = require_string(&args, "language")?;
        let name = require_string(&args, "name")?;

        info!(%language, %name, "Scaffolding package");
        let cmd = CommandSpec::new(ctx.config().codegen_command.clone())
            .args(["new", language.as_str(), name.as_str()]);
        ctx.run(cmd).await?;
        Ok(PropertyMap::new())
    }
}

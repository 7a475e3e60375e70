//! `pulumi-package:index:Install`: installs the provider and Node.js SDK locally.

use tracing::info;

use super::{InvokeContext, InvokeHandler, INSTALL_TOKEN};
use crate::command::CommandSpec;
use crate::error::ProviderError;
use crate::property::PropertyMap;
use crate::schema::{FunctionSpec, ObjectTypeSpec, PropertySpec};

/// Installs the provider and the Node.js SDK locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct Install;

#[async_trait::async_trait]
impl InvokeHandler for Install {
    fn token(&self) -> &str {
        INSTALL_TOKEN
    }

    fn spec(&self) -> FunctionSpec {
        FunctionSpec::new()
            .with_description("Install the provider plugin and Node.js SDK on this machine.")
            .with_inputs(
                ObjectTypeSpec::new()
                    .with_property("language", PropertySpec::string())
                    .with_property("name", PropertySpec::string()),
            )
    }

    async fn invoke(&self, ctx: &InvokeContext, _args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        info!("Installing provider and SDKs");
        ctx.run(CommandSpec::new("make").args(["install_provider", "install_nodejs_sdk"]))
            .await?;
        Ok(PropertyMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::testing::RecordingRunner;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_install_runs_both_targets() {
        let runner = Arc::new(RecordingRunner::new());
        let ctx = InvokeContext::new(runner.clone(), ProviderConfig::default());

        Install.invoke(&ctx, PropertyMap::new()).await.unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["make install_provider install_nodejs_sdk"]
        );
    }
}

//! Testing utilities for the package provider.
//!
//! This module lets invokes and components be exercised without spinning
//! up a gRPC server or running real commands: [`RecordingRunner`] records
//! command lines instead of spawning them, and [`MockMonitor`] stands in
//! for the engine's resource monitor, routing invokes back into the
//! provider the way the engine would.
//!
//! # Example
//!
//! ```
//! use pulumi_package::component::PACKAGE_TOKEN;
//! use pulumi_package::property::property_map_from_json;
//! use pulumi_package::testing::ProviderTester;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let tester = ProviderTester::new().with_stack_config("action", "build");
//! let inputs = property_map_from_json(json!({"name": "widgets", "language": "go"}));
//!
//! tester.construct(PACKAGE_TOKEN, "widgets", inputs).await.unwrap();
//! assert_eq!(tester.runner().command_lines(), vec!["make build"]);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::component::{ConstructContext, ConstructResult};
use crate::config::{StackConfig, PACKAGE_NAME};
use crate::error::ProviderError;
use crate::monitor::{failures_to_error, RegisterResource, RegisteredResource, ResourceMonitor};
use crate::property::{PropertyMap, PropertyValue};
use crate::server::{InvokeOutcome, PackageProvider};
use crate::validation::CheckFailure;

const GET_RESOURCE_TOKEN: &str = "pulumi:pulumi:getResource";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A [`CommandRunner`] that records commands instead of running them.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Vec<(String, String)>,
    cancelled: Mutex<bool>,
}

impl RecordingRunner {
    /// A runner where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail commands whose command line starts with `prefix`.
    pub fn fail_on(mut self, prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.push((prefix.into(), reason.into()));
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    /// The command lines run so far.
    pub fn command_lines(&self) -> Vec<String> {
        lock(&self.calls).iter().map(CommandSpec::display).collect()
    }

    /// Whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }
}

#[async_trait::async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProviderError> {
        lock(&self.calls).push(spec.clone());

        let line = spec.display();
        if let Some((_, reason)) = self.failures.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            return Err(ProviderError::Command {
                command: line,
                reason: reason.clone(),
            });
        }
        Ok(CommandOutput::default())
    }

    fn cancel(&self) {
        *lock(&self.cancelled) = true;
    }
}

/// URN the [`MockMonitor`] assigns to a registered resource.
pub fn mock_urn(type_token: &str, name: &str) -> String {
    format!("urn:pulumi:test::test::{}::{}", type_token, name)
}

/// An in-memory resource monitor.
///
/// Invokes are dispatched to the wrapped provider; `getResource` is
/// answered from the outputs registered so far, so state carries over
/// between constructions the way it does across deployments.
pub struct MockMonitor {
    provider: Arc<PackageProvider>,
    invocations: Mutex<Vec<(String, PropertyMap)>>,
    registrations: Mutex<Vec<RegisterResource>>,
    outputs: Mutex<HashMap<String, PropertyMap>>,
    state: Mutex<HashMap<String, PropertyMap>>,
}

impl MockMonitor {
    /// A monitor that routes invokes to `provider`.
    pub fn new(provider: Arc<PackageProvider>) -> Self {
        Self {
            provider,
            invocations: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            outputs: Mutex::new(HashMap::new()),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Every invoke made through the monitor, in order.
    pub fn invocations(&self) -> Vec<(String, PropertyMap)> {
        lock(&self.invocations).clone()
    }

    /// Every resource registration, in order.
    pub fn registrations(&self) -> Vec<RegisterResource> {
        lock(&self.registrations).clone()
    }

    /// Outputs registered for `urn` by the latest construction, if any.
    pub fn outputs(&self, urn: &str) -> Option<PropertyMap> {
        lock(&self.outputs).get(urn).cloned()
    }

    /// Seed the state `getResource` returns for `urn`.
    pub fn set_resource_state(&self, urn: &str, state: PropertyMap) {
        lock(&self.state).insert(urn.to_string(), state);
    }

    fn get_resource(&self, args: &PropertyMap) -> Result<PropertyMap, ProviderError> {
        let urn = args
            .get("urn")
            .and_then(PropertyValue::as_str)
            .ok_or_else(|| ProviderError::InvalidArgument("getResource requires a urn".to_string()))?;

        let state = lock(&self.state).get(urn).cloned().unwrap_or_default();
        let mut result = PropertyMap::new();
        result.insert("urn".to_string(), PropertyValue::from(urn));
        result.insert("state".to_string(), PropertyValue::Object(state));
        Ok(result)
    }
}

#[async_trait::async_trait]
impl ResourceMonitor for MockMonitor {
    async fn register_resource(&self, request: RegisterResource) -> Result<RegisteredResource, ProviderError> {
        let urn = mock_urn(&request.type_token, &request.name);
        let object = request.object.clone();
        lock(&self.registrations).push(request);
        Ok(RegisteredResource { urn, object })
    }

    async fn register_resource_outputs(&self, urn: &str, outputs: PropertyMap) -> Result<(), ProviderError> {
        lock(&self.outputs).insert(urn.to_string(), outputs.clone());
        lock(&self.state).insert(urn.to_string(), outputs);
        Ok(())
    }

    async fn invoke(&self, token: &str, args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        lock(&self.invocations).push((token.to_string(), args.clone()));

        if token == GET_RESOURCE_TOKEN {
            return self.get_resource(&args);
        }
        match self.provider.call(token, args).await? {
            InvokeOutcome::Return(result) => Ok(result),
            InvokeOutcome::Failures(failures) => Err(failures_to_error(token, &failures)),
        }
    }
}

/// Error type for [`ProviderTester::invoke`].
#[derive(Debug)]
pub enum TestError {
    /// The provider returned an error.
    Provider(ProviderError),
    /// The arguments failed validation.
    Failures(Vec<CheckFailure>),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
            TestError::Failures(failures) => {
                writeln!(f, "Validation failures:")?;
                for failure in failures {
                    writeln!(f, "  - {}", failure)?;
                }
                Ok(())
            },
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

/// A test harness for the package provider.
///
/// Wraps a [`PackageProvider`] built with a [`RecordingRunner`] and a
/// [`MockMonitor`], and keeps the stack configuration used for
/// constructions.
pub struct ProviderTester {
    provider: Arc<PackageProvider>,
    runner: Arc<RecordingRunner>,
    monitor: Arc<MockMonitor>,
    stack_config: Mutex<HashMap<String, String>>,
    secret_keys: Mutex<Vec<String>>,
}

impl Default for ProviderTester {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderTester {
    /// A tester where every command succeeds.
    pub fn new() -> Self {
        Self::with_runner(RecordingRunner::new())
    }

    /// A tester around a preconfigured runner.
    pub fn with_runner(runner: RecordingRunner) -> Self {
        let runner = Arc::new(runner);
        let provider = Arc::new(
            PackageProvider::builder(PACKAGE_NAME)
                .with_invokes(crate::invoke::all())
                .with_components(crate::component::all())
                .with_runner(runner.clone())
                .build(),
        );
        Self {
            monitor: Arc::new(MockMonitor::new(provider.clone())),
            provider,
            runner,
            stack_config: Mutex::new(HashMap::new()),
            secret_keys: Mutex::new(Vec::new()),
        }
    }

    /// Set a stack config value. Bare keys go in the package namespace.
    pub fn with_stack_config(self, key: &str, value: &str) -> Self {
        self.set_stack_config(key, value);
        self
    }

    /// Set a stack config value that the engine reports as secret.
    pub fn with_secret_stack_config(self, key: &str, value: &str) -> Self {
        let key = self.set_stack_config(key, value);
        lock(&self.secret_keys).push(key);
        self
    }

    /// Set a stack config value between constructions. Returns the full key.
    pub fn set_stack_config(&self, key: &str, value: &str) -> String {
        let key = if key.contains(':') {
            key.to_string()
        } else {
            format!("{}:{}", PACKAGE_NAME, key)
        };
        lock(&self.stack_config).insert(key.clone(), value.to_string());
        key
    }

    /// The provider under test.
    pub fn provider(&self) -> &PackageProvider {
        &self.provider
    }

    /// The command runner.
    pub fn runner(&self) -> &RecordingRunner {
        &self.runner
    }

    /// The resource monitor.
    pub fn monitor(&self) -> &MockMonitor {
        &self.monitor
    }

    /// Call an invoke directly.
    pub async fn invoke(&self, token: &str, args: PropertyMap) -> Result<PropertyMap, TestError> {
        match self.provider.call(token, args).await? {
            InvokeOutcome::Return(result) => Ok(result),
            InvokeOutcome::Failures(failures) => Err(TestError::Failures(failures)),
        }
    }

    /// Construct a component against the mock monitor.
    pub async fn construct(
        &self,
        type_token: &str,
        name: &str,
        inputs: PropertyMap,
    ) -> Result<ConstructResult, ProviderError> {
        let config = StackConfig::new(PACKAGE_NAME, lock(&self.stack_config).clone())
            .with_secret_keys(lock(&self.secret_keys).clone());
        let monitor: Arc<dyn ResourceMonitor> = self.monitor.clone();
        let ctx = ConstructContext::new(monitor, "test", "test", config);
        self.provider.construct_component(&ctx, type_token, name, inputs).await
    }
}

// =============================================================================
// Assertion Helpers
// =============================================================================

/// Assert that an invoke was rejected with a failure on `property`.
pub fn assert_failure_on<T: std::fmt::Debug>(result: &Result<T, TestError>, property: &str) {
    match result {
        Err(TestError::Failures(failures)) => assert!(
            failures.iter().any(|f| f.property == property),
            "Expected a failure on '{}', got: {:?}",
            property,
            failures
        ),
        other => panic!("Expected validation failures, got: {:?}", other),
    }
}

/// Assert that the error message contains a substring.
pub fn assert_error_contains<T: std::fmt::Debug, E: std::fmt::Display>(result: &Result<T, E>, substring: &str) {
    match result {
        Err(e) => assert!(
            e.to_string().contains(substring),
            "Expected error containing '{}', got: {}",
            substring,
            e
        ),
        Ok(value) => panic!("Expected an error containing '{}', got: {:?}", substring, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::PACKAGE_TOKEN;
    use crate::property::property_map_from_json;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_recording_runner_fails_on_prefix() {
        let runner = RecordingRunner::new().fail_on("make install", "exit status 2");

        assert_ok!(runner.run(&CommandSpec::new("make").arg("build")).await);
        let err = assert_err!(
            runner
                .run(&CommandSpec::new("make").args(["install_provider", "install_nodejs_sdk"]))
                .await
        );

        assert_eq!(
            err.to_string(),
            "command `make install_provider install_nodejs_sdk` failed: exit status 2"
        );
        assert_eq!(runner.calls().len(), 2);
        assert!(!runner.is_cancelled());
        runner.cancel();
        assert!(runner.is_cancelled());
    }

    #[tokio::test]
    async fn test_invoke_through_tester() {
        let tester = ProviderTester::new();
        let result = tester
            .invoke(
                "pulumi-package:index:New",
                property_map_from_json(json!({"language": "python", "name": "widgets"})),
            )
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(tester.runner().command_lines(), vec!["platypack new python widgets"]);
    }

    #[tokio::test]
    async fn test_invoke_failures_surface() {
        let tester = ProviderTester::new();
        let result = tester
            .invoke("pulumi-package:index:New", property_map_from_json(json!({"name": 3})))
            .await;
        assert_failure_on(&result, "name");
        assert_failure_on(&result, "language");
        assert!(tester.runner().calls().is_empty());

        let result = tester.invoke("pulumi-package:index:Deploy", PropertyMap::new()).await;
        assert_error_contains(&result, "unknown invoke request for token: pulumi-package:index:Deploy");
    }

    #[tokio::test]
    async fn test_mock_monitor_rejects_invalid_args() {
        let tester = ProviderTester::new();
        let err = tester
            .monitor()
            .invoke("pulumi-package:index:Publish", PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument(_)));
        assert!(err
            .to_string()
            .starts_with("invalid argument: pulumi-package:index:Publish rejected its arguments: "));
    }

    #[tokio::test]
    async fn test_mock_monitor_get_resource() {
        let tester = ProviderTester::new();
        let urn = mock_urn(PACKAGE_TOKEN, "pkg");

        let mut args = PropertyMap::new();
        args.insert("urn".to_string(), PropertyValue::from(urn.as_str()));

        let empty = tester.monitor().invoke(GET_RESOURCE_TOKEN, args.clone()).await.unwrap();
        assert_eq!(empty.get("state"), Some(&PropertyValue::Object(PropertyMap::new())));

        let outputs = property_map_from_json(json!({"releases": ["a"]}));
        tester
            .monitor()
            .register_resource_outputs(&urn, outputs.clone())
            .await
            .unwrap();
        let found = tester.monitor().invoke(GET_RESOURCE_TOKEN, args).await.unwrap();
        assert_eq!(found.get("state"), Some(&PropertyValue::Object(outputs)));
    }

    #[tokio::test]
    async fn test_construct_unknown_component() {
        let tester = ProviderTester::new();
        let result = tester
            .construct("pulumi-package:index:Website", "site", PropertyMap::new())
            .await;
        assert_error_contains(&result, "unknown construct request for type");
    }

    #[tokio::test]
    async fn test_construct_rejects_bad_inputs() {
        let tester = ProviderTester::new().with_stack_config("action", "build");
        let result = tester
            .construct(PACKAGE_TOKEN, "pkg", property_map_from_json(json!({"name": ["x"]})))
            .await;
        assert_error_contains(&result, "name: ");
        assert!(tester.monitor().registrations().is_empty());
    }

    #[test]
    fn test_stack_config_keys() {
        let tester = ProviderTester::new()
            .with_stack_config("action", "new")
            .with_stack_config("aws:region", "us-east-1");
        let config = lock(&tester.stack_config);
        assert_eq!(config.get("pulumi-package:action").map(String::as_str), Some("new"));
        assert_eq!(config.get("aws:region").map(String::as_str), Some("us-east-1"));
    }
}

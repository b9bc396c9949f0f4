use anyhow::Result;
use log::info;

use crate::{
    config::Config,
    error::PublishError,
    labels::SelectorConvention,
    manifests,
    models::{BuildPlan, BuildPolicy, DeploymentDescriptor},
    resolver::{discover, Resolution, Resolver},
    services::{ImagePublisher, ManifestApplier},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PublishOperation {
    Build,
    Reuse,
}

pub struct Controller {
    publisher: Box<dyn ImagePublisher>,
    applier: Box<dyn ManifestApplier>,
    resolver: Resolver,
    convention: SelectorConvention,
    config: Config,
}

impl Controller {
    pub fn init<P, A>(config: Config, publisher: P, applier: A) -> Result<Controller>
    where
        P: 'static + ImagePublisher,
        A: 'static + ManifestApplier,
    {
        let resolver = Resolver::from_config(&config)?;
        Ok(Controller::with_resolver(config, resolver, publisher, applier))
    }

    pub fn with_resolver<P, A>(
        config: Config,
        resolver: Resolver,
        publisher: P,
        applier: A,
    ) -> Controller
    where
        P: 'static + ImagePublisher,
        A: 'static + ManifestApplier,
    {
        Controller {
            publisher: Box::new(publisher),
            applier: Box::new(applier),
            resolver,
            convention: SelectorConvention,
            config,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// One resolution per directory under the services root.
    pub fn resolve(&self) -> Result<Vec<Resolution>> {
        let dirs = discover(&self.config.services_root)?;
        Ok(self.resolver.resolve_all(&dirs))
    }

    /// Decides which plans need a build. Tags carry the content hash, so an
    /// existing tag is an image of exactly this context.
    pub fn publish_diff(
        &mut self,
        plans: Vec<BuildPlan>,
        policy: BuildPolicy,
    ) -> Result<Vec<(BuildPlan, PublishOperation)>> {
        let mut diff = Vec::with_capacity(plans.len());

        for plan in plans {
            let operation = match policy {
                BuildPolicy::Always => PublishOperation::Build,
                BuildPolicy::IfMissing if self.publisher.image_exists(&plan.image_tag)? => {
                    info!("{}: {} already exists", plan.service, plan.image_tag);
                    PublishOperation::Reuse
                }
                BuildPolicy::IfMissing => PublishOperation::Build,
            };
            diff.push((plan, operation));
        }

        Ok(diff)
    }

    pub fn publish_apply(
        &mut self,
        plan: &BuildPlan,
        operation: PublishOperation,
    ) -> Result<(), PublishError> {
        match operation {
            PublishOperation::Build => self.publisher.publish(plan),
            PublishOperation::Reuse => Ok(()),
        }
    }

    /// Descriptors for plans whose image is available in the registry.
    pub fn descriptors(&self, published: &[BuildPlan]) -> Vec<DeploymentDescriptor> {
        published
            .iter()
            .map(|plan| DeploymentDescriptor::from_plan(plan, self.namespace(), &self.convention))
            .collect()
    }

    pub fn render(&self, descriptors: &[DeploymentDescriptor]) -> Result<String> {
        manifests::render(self.namespace(), descriptors, &self.convention)
    }

    pub fn deploy(&mut self, descriptors: &[DeploymentDescriptor]) -> Result<()> {
        let manifests = self.render(descriptors)?;
        let namespace = self.config.namespace.clone();
        self.applier.apply(&namespace, descriptors, &manifests)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{ApplyError, ResolveError},
        models::ImageTag,
        templates::Templates,
    };
    use std::{
        cell::RefCell,
        collections::BTreeSet as Set,
        fs,
        path::Path,
        rc::Rc,
    };
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Calls {
        published: Rc<RefCell<Vec<String>>>,
        applied: Rc<RefCell<Vec<(String, String)>>>,
    }

    struct FakePublisher {
        existing: Set<String>,
        failing: Set<String>,
        calls: Calls,
    }

    impl ImagePublisher for FakePublisher {
        fn image_exists(&mut self, tag: &ImageTag) -> Result<bool> {
            Ok(self.existing.iter().any(|service| tag.0.contains(&format!("/{}:", service))))
        }

        fn publish(&mut self, plan: &BuildPlan) -> Result<(), PublishError> {
            if self.failing.contains(&plan.service.0) {
                return Err(PublishError {
                    service: plan.service.clone(),
                    tag: plan.image_tag.clone(),
                    message: "unauthorized".into(),
                });
            }
            self.calls.published.borrow_mut().push(plan.service.0.clone());
            Ok(())
        }
    }

    struct FakeApplier {
        calls: Calls,
    }

    impl ManifestApplier for FakeApplier {
        fn apply(
            &mut self,
            namespace: &str,
            _descriptors: &[DeploymentDescriptor],
            manifests: &str,
        ) -> Result<(), ApplyError> {
            self.calls
                .applied
                .borrow_mut()
                .push((namespace.into(), manifests.into()));
            Ok(())
        }
    }

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let services = dir.path().join("services");
        for (name, file, contents) in &[
            ("api", "package.json", r#"{"version": "2.1.0"}"#),
            ("service-3", "index.js", "app.listen(80)"),
            ("web", "Dockerfile", "FROM nginx\n"),
            ("worker", "Cargo.toml", "[package]\n"),
        ] {
            fs::create_dir_all(services.join(name)).unwrap();
            fs::write(services.join(name).join(file), contents).unwrap();
        }
        dir
    }

    fn controller(root: &Path, existing: &[&str], failing: &[&str], calls: &Calls) -> Controller {
        let mut config = Config::defaults(root);
        config.org = "acme".into();
        config.namespace = "staging".into();
        let resolver = Resolver::new(&config, Templates::default());

        let publisher = FakePublisher {
            existing: existing.iter().map(|s| s.to_string()).collect(),
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: calls.clone(),
        };
        let applier = FakeApplier {
            calls: calls.clone(),
        };

        Controller::with_resolver(config, resolver, publisher, applier)
    }

    fn plans(resolutions: Vec<Resolution>) -> Vec<BuildPlan> {
        resolutions
            .into_iter()
            .filter_map(|resolution| resolution.outcome.ok())
            .collect()
    }

    #[test]
    fn resolves_every_service_and_keeps_failures() {
        let dir = workspace();
        let calls = Calls::default();
        let controller = controller(dir.path(), &[], &[], &calls);

        let resolutions = controller.resolve().unwrap();
        assert_eq!(resolutions.len(), 4);

        let failed = resolutions
            .iter()
            .filter_map(|r| r.outcome.as_ref().err())
            .collect::<Vec<_>>();
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            failed[0],
            ResolveError::UnresolvedBuildRecipe(name) if name.0 == "service-3"
        ));
    }

    #[test]
    fn existing_images_are_reused_unless_forced() {
        let dir = workspace();
        let calls = Calls::default();
        let mut controller = controller(dir.path(), &["web"], &[], &calls);
        let plans = plans(controller.resolve().unwrap());

        let diff = controller
            .publish_diff(plans.clone(), BuildPolicy::IfMissing)
            .unwrap();
        let operations = diff
            .iter()
            .map(|(plan, operation)| (plan.service.0.as_str(), *operation))
            .collect::<Vec<_>>();
        assert_eq!(
            operations,
            vec![
                ("api", PublishOperation::Build),
                ("web", PublishOperation::Reuse),
                ("worker", PublishOperation::Build),
            ]
        );

        let diff = controller.publish_diff(plans, BuildPolicy::Always).unwrap();
        assert!(diff
            .iter()
            .all(|(_, operation)| *operation == PublishOperation::Build));
    }

    #[test]
    fn failed_publish_keeps_service_out_of_the_deploy() {
        let dir = workspace();
        let calls = Calls::default();
        let mut controller = controller(dir.path(), &[], &["worker"], &calls);
        let plans = plans(controller.resolve().unwrap());
        let diff = controller.publish_diff(plans, BuildPolicy::Always).unwrap();

        let mut published = Vec::new();
        let mut failures = Vec::new();
        for (plan, operation) in diff {
            match controller.publish_apply(&plan, operation) {
                Ok(()) => published.push(plan),
                Err(err) => failures.push(err),
            }
        }

        assert_eq!(*calls.published.borrow(), vec!["api", "web"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service.0, "worker");
        assert_eq!(failures[0].message, "unauthorized");

        let descriptors = controller.descriptors(&published);
        controller.deploy(&descriptors).unwrap();

        let applied = calls.applied.borrow();
        assert_eq!(applied.len(), 1);
        let (namespace, yaml) = &applied[0];
        assert_eq!(namespace, "staging");
        assert!(yaml.contains("name: api"));
        assert!(yaml.contains("name: web"));
        assert!(!yaml.contains("worker"));
        assert!(yaml.contains("gcr.io/acme/api:2.1.0-"));
    }
}

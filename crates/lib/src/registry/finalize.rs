use tracing::debug;

use super::{ConfigError, DEFAULT_ENVIRONMENT, Registry};
use crate::target::{Definition, EnvironmentDef, ExternalDef, ExternalKind, TargetBody, TargetId, TargetKind};

impl Registry {
  /// Validate the loaded recipes and freeze the registry.
  ///
  /// - A default environment is chosen, creating an empty `default` one if needed.
  /// - Externals that were only referenced become unknown externals to be found.
  /// - Every other placeholder is an unresolved forward reference.
  /// - Attribute references must point at targets of the expected kind.
  /// - Alias forwards and environment parents must not loop.
  ///
  /// Calling finalize again is a no-op.
  ///
  /// # Errors
  ///
  /// Returns the first [`ConfigError`] found.
  pub fn finalize(&mut self) -> Result<(), ConfigError> {
    if self.finalized {
      return Ok(());
    }

    self.ensure_default_environment()?;
    self.complete_external_placeholders();
    self.check_forward_references()?;
    self.check_reference_kinds()?;
    self.check_alias_cycles()?;
    self.check_environment_cycles()?;

    self.finalized = true;
    debug!(targets = self.targets.len(), "registry finalized");
    Ok(())
  }

  fn ensure_default_environment(&mut self) -> Result<(), ConfigError> {
    if self.default_environment.is_some() {
      return Ok(());
    }

    let id = self.reference(TargetKind::Environment, DEFAULT_ENVIRONMENT)?;
    let target = &mut self.targets[id.0];
    if target.is_placeholder() {
      debug!("creating empty default environment");
      target.definition = Definition::Complete(TargetBody::Environment(EnvironmentDef::new()));
    }
    self.default_environment = Some(id);
    Ok(())
  }

  fn complete_external_placeholders(&mut self) {
    for target in &mut self.targets {
      if target.kind == TargetKind::External && target.is_placeholder() {
        debug!(name = %target.name, "external referenced without declaration, finder will locate it");
        let def = ExternalDef::new(target.name.clone(), ExternalKind::Unknown);
        target.definition = Definition::Complete(TargetBody::External(def));
      }
    }
  }

  fn check_forward_references(&self) -> Result<(), ConfigError> {
    let Some((id, target)) = self.iter().find(|(_, t)| t.is_placeholder()) else {
      return Ok(());
    };

    Err(ConfigError::UnresolvedForwardReference {
      kind: target.kind,
      name: target.name.clone(),
      referenced_by: self.referrers(id),
    })
  }

  fn referrers(&self, id: TargetId) -> Vec<String> {
    self
      .iter()
      .filter(|(_, t)| t.references().iter().any(|r| r.target == id))
      .map(|(_, t)| t.label())
      .collect()
  }

  fn check_reference_kinds(&self) -> Result<(), ConfigError> {
    for (_, target) in self.iter() {
      for reference in target.references() {
        if reference.expected.is_empty() {
          continue;
        }
        let referent = self.target(self.resolve(reference.target));
        if !reference.expected.contains(&referent.kind) {
          return Err(ConfigError::KindMismatch {
            owner: target.label(),
            field: reference.field,
            expected: reference.expected.iter().map(|k| k.to_string()).collect(),
            found: referent.label(),
          });
        }
      }
    }
    Ok(())
  }

  fn check_alias_cycles(&self) -> Result<(), ConfigError> {
    for id in self.of_kind(TargetKind::Alias) {
      let mut chain = vec![id];
      let mut current = id;
      while let Some(next) = self.target(current).alias_target() {
        if let Some(pos) = chain.iter().position(|&seen| seen == next) {
          let mut path: Vec<String> = chain[pos..].iter().map(|&t| self.label(t)).collect();
          path.push(self.label(next));
          return Err(ConfigError::DependencyCycle { path });
        }
        chain.push(next);
        current = next;
      }
    }
    Ok(())
  }

  fn check_environment_cycles(&self) -> Result<(), ConfigError> {
    for id in self.of_kind(TargetKind::Environment) {
      let mut chain = vec![id];
      let mut current = id;
      while let Some(parent) = self.environment_parent(current) {
        if let Some(pos) = chain.iter().position(|&seen| seen == parent) {
          let mut names: Vec<String> = chain[pos..].iter().map(|&t| self.label(t)).collect();
          names.push(self.label(parent));
          return Err(ConfigError::CyclicEnvironment { chain: names });
        }
        chain.push(parent);
        current = parent;
      }
    }
    Ok(())
  }
}

// Method Registry
//
// Built once during startup, immutable afterwards. All pattern and schema
// compilation happens here so dispatch never pays for it and never fails
// on a bad registration.

use crate::domain::scope::Scope;
use crate::error::{EngineError, Result};
use crate::port::service::{Handler, RpcService};
use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use jsonschema::Validator;
use std::collections::BTreeMap;

/// Stored method data.
pub struct MethodRecord {
    pub handler: Handler,
    /// Accepted parameter names; also the signature shown by `rpc.api`.
    pub params: Vec<String>,
    pub service_name: String,
    pub permission: Scope,
    pub validator: Option<Validator>,
    pub doc: Option<String>,
}

/// Collects capability bundles during the startup phase.
pub struct RegistryBuilder {
    blacklist: GlobSet,
    blacklist_scope: i32,
    methods: BTreeMap<String, MethodRecord>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("blacklist", &self.blacklist)
            .field("blacklist_scope", &self.blacklist_scope)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistryBuilder {
    pub fn new(blacklist_routes: &[String], blacklist_scope: i32) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in blacklist_routes {
            builder.add(compile_glob(pattern)?);
        }
        let blacklist = builder.build().map_err(|e| EngineError::InvalidPattern {
            pattern: blacklist_routes.join(","),
            message: e.to_string(),
        })?;
        Ok(Self {
            blacklist,
            blacklist_scope,
            methods: BTreeMap::new(),
        })
    }

    /// Register every admissible route of a capability bundle under
    /// `"service.route"`.
    ///
    /// A route is skipped when its full name matches a blacklist pattern or
    /// its resolved permission does not exceed the blacklist scope.
    /// Permission resolution: first matching pattern in declaration order
    /// wins; unmatched routes require `Scope::System`.
    pub fn register_service(&mut self, service_name: &str, service: &dyn RpcService) -> Result<()> {
        let mut validators = service.validators();
        let permissions = service
            .permissions()
            .into_iter()
            .map(|(pattern, scope)| Ok((compile_glob(&pattern)?.compile_matcher(), scope)))
            .collect::<Result<Vec<(GlobMatcher, Scope)>>>()?;

        for route in service.routes() {
            let full_name = format!("{service_name}.{}", route.name);
            if self.blacklist.is_match(&full_name) {
                continue;
            }
            let permission = permissions
                .iter()
                .find(|(matcher, _)| matcher.is_match(&route.name))
                .map(|(_, scope)| *scope)
                .unwrap_or(Scope::System);
            if permission.level() <= self.blacklist_scope {
                continue;
            }
            let validator = match validators.remove(&route.name) {
                Some(schema) => Some(jsonschema::validator_for(&schema).map_err(|e| {
                    EngineError::InvalidSchema {
                        route: full_name.clone(),
                        message: e.to_string(),
                    }
                })?),
                None => None,
            };
            self.methods.insert(
                full_name,
                MethodRecord {
                    handler: route.handler,
                    params: route.params,
                    service_name: service_name.to_string(),
                    permission,
                    validator,
                    doc: route.doc,
                },
            );
        }
        Ok(())
    }

    pub fn build(self) -> MethodRegistry {
        MethodRegistry {
            methods: self.methods,
        }
    }
}

fn compile_glob(pattern: &str) -> Result<Glob> {
    Glob::new(pattern).map_err(|e| EngineError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Frozen route map shared by reference with the engine.
pub struct MethodRegistry {
    methods: BTreeMap<String, MethodRecord>,
}

impl MethodRegistry {
    pub fn lookup(&self, name: &str) -> Option<&MethodRecord> {
        self.methods.get(name)
    }

    /// Routes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MethodRecord)> {
        self.methods.iter()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

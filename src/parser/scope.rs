//! Lexical scopes for variables and struct tags
//!
//! [`ScopeManager`] keeps two parallel chains, one for variable names and one
//! for struct tags. Entering a scope pushes an empty link on both; leaving
//! pops both. Lookups walk from the innermost link outwards, so an inner
//! declaration shadows an outer one, while a second declaration of the same
//! name inside one link is refused.

use super::ast::{TypeRef, VarId};
use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct ScopeManager {
    vars: Vec<FxHashMap<String, VarId>>,
    tags: Vec<FxHashMap<String, TypeRef>>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeManager {
    /// Create a manager holding only the file (global) scope
    pub fn new() -> Self {
        ScopeManager {
            vars: vec![FxHashMap::default()],
            tags: vec![FxHashMap::default()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.vars.push(FxHashMap::default());
        self.tags.push(FxHashMap::default());
    }

    /// Pop the innermost link of both chains. The file scope is never popped.
    pub fn leave_scope(&mut self) {
        if self.vars.len() > 1 {
            self.vars.pop();
            self.tags.pop();
        }
    }

    /// Number of open scopes, 1 at file level
    pub fn depth(&self) -> usize {
        self.vars.len()
    }

    pub fn is_global(&self) -> bool {
        self.depth() == 1
    }

    /// Declare `name` in the innermost scope. Returns `false` if the name is
    /// already declared in that same scope.
    #[must_use]
    pub fn declare_var(&mut self, name: &str, var: VarId) -> bool {
        match self.vars.last_mut() {
            Some(innermost) if !innermost.contains_key(name) => {
                innermost.insert(name.to_string(), var);
                true
            }
            _ => false,
        }
    }

    pub fn lookup_var(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Look only at the innermost scope
    pub fn lookup_var_innermost(&self, name: &str) -> Option<VarId> {
        self.vars.last().and_then(|scope| scope.get(name).copied())
    }

    /// Look only at the file scope
    pub fn lookup_global_var(&self, name: &str) -> Option<VarId> {
        self.vars.first().and_then(|scope| scope.get(name).copied())
    }

    #[must_use]
    pub fn declare_tag(&mut self, name: &str, ty: TypeRef) -> bool {
        match self.tags.last_mut() {
            Some(innermost) if !innermost.contains_key(name) => {
                innermost.insert(name.to_string(), ty);
                true
            }
            _ => false,
        }
    }

    pub fn lookup_tag(&self, name: &str) -> Option<TypeRef> {
        self.tags
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Type;

    #[test]
    fn test_shadowing_outer_scope_is_allowed() {
        let mut scopes = ScopeManager::new();
        assert!(scopes.declare_var("x", VarId(0)));
        scopes.enter_scope();
        assert!(scopes.declare_var("x", VarId(1)));
        assert_eq!(scopes.lookup_var("x"), Some(VarId(1)));
        scopes.leave_scope();
        assert_eq!(scopes.lookup_var("x"), Some(VarId(0)));
    }

    #[test]
    fn test_redeclaration_in_same_scope_is_refused() {
        let mut scopes = ScopeManager::new();
        scopes.enter_scope();
        assert!(scopes.declare_var("x", VarId(0)));
        assert!(!scopes.declare_var("x", VarId(1)));
        assert_eq!(scopes.lookup_var("x"), Some(VarId(0)));
    }

    #[test]
    fn test_leaving_scope_drops_its_names() {
        let mut scopes = ScopeManager::new();
        scopes.enter_scope();
        assert!(scopes.declare_var("i", VarId(3)));
        assert!(scopes.declare_tag("S", Type::int()));
        scopes.leave_scope();
        assert_eq!(scopes.lookup_var("i"), None);
        assert!(scopes.lookup_tag("S").is_none());
    }

    #[test]
    fn test_tags_follow_the_same_rules() {
        let mut scopes = ScopeManager::new();
        assert!(scopes.declare_tag("V", Type::int()));
        assert!(!scopes.declare_tag("V", Type::char()));
        scopes.enter_scope();
        assert!(scopes.declare_tag("V", Type::char()));
        assert_eq!(scopes.lookup_tag("V").unwrap().size, 1);
    }

    #[test]
    fn test_global_lookup_ignores_inner_scopes() {
        let mut scopes = ScopeManager::new();
        assert!(scopes.declare_var("g", VarId(0)));
        scopes.enter_scope();
        assert!(scopes.declare_var("x", VarId(1)));
        assert_eq!(scopes.lookup_global_var("g"), Some(VarId(0)));
        assert_eq!(scopes.lookup_global_var("x"), None);
    }

    #[test]
    fn test_file_scope_is_never_popped() {
        let mut scopes = ScopeManager::new();
        scopes.leave_scope();
        assert!(scopes.is_global());
        assert!(scopes.declare_var("g", VarId(0)));
    }
}

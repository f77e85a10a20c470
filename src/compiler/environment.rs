use super::CompileError;
use crate::value::Value;
use std::{collections::HashMap, fmt, rc::Rc};

pub type ScopeRef = Rc<Scope>;

/// One frame of the evaluator's scope chain. Frames are immutable once built,
/// so closures can hold on to the chain they were created in.
pub struct Scope {
    name: String,
    words: HashMap<String, Value>,
    parent: Option<ScopeRef>,
    depth: usize,
}

impl Scope {
    pub fn global() -> ScopeRef {
        Rc::new(Scope {
            name: "global".to_string(),
            words: HashMap::new(),
            parent: None,
            depth: 0,
        })
    }

    /// The frame for one function call. Names resolve through `parent`, the scope the
    /// function closed over; depth counts from the deeper of `parent` and `caller`, so
    /// recursion through closures is bounded too.
    pub fn call(
        parent: &ScopeRef,
        caller: &Scope,
        name: &str,
        words: impl IntoIterator<Item = (String, Value)>,
        limit: usize,
    ) -> Result<ScopeRef, CompileError> {
        let depth = parent.depth.max(caller.depth) + 1;
        if depth > limit {
            return Err(CompileError::RunawayRecursion {
                limit,
                name: name.to_string(),
                at: None,
            });
        }
        Ok(Rc::new(Scope {
            name: name.to_string(),
            words: words.into_iter().collect(),
            parent: Some(parent.clone()),
            depth,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Finds the innermost binding of `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.words.get(name) {
                return Some(value);
            }
            scope = scope.parent.as_deref()?;
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let global = Scope::global();
        let outer = Scope::call(
            &global,
            &global,
            "outer",
            vec![("x".to_string(), Value::from("outer")), ("y".to_string(), Value::Null)],
            10,
        )
        .unwrap();
        let inner = Scope::call(
            &outer,
            &global,
            "inner",
            vec![("x".to_string(), Value::from("inner"))],
            10,
        )
        .unwrap();
        assert_eq!(inner.get("x"), Some(&Value::from("inner")));
        assert_eq!(inner.get("y"), Some(&Value::Null));
        assert_eq!(outer.get("x"), Some(&Value::from("outer")));
        assert_eq!(inner.get("z"), None);
        assert_eq!(inner.depth(), 2);
    }

    #[test]
    fn call_depth_follows_the_caller() {
        let global = Scope::global();
        let mut caller = global.clone();
        for _ in 0..3 {
            caller = Scope::call(&global, &caller, "f", Vec::new(), 3).unwrap();
        }
        assert_eq!(caller.depth(), 3);
        assert_eq!(caller.name(), "f");
        assert!(matches!(
            Scope::call(&global, &caller, "f", Vec::new(), 3),
            Err(CompileError::RunawayRecursion { limit: 3, .. })
        ));
    }
}

//! Macro pathfinding over the mode graph.
//!
//! Modes are nodes; every macro with a target declared on mode X is an edge
//! from X to that target. Searches are breadth-first and visit a mode's
//! macros in declaration order, so the shortest path wins and ties go to
//! the macro declared first.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use crate::descriptor::ModeSpec;
use crate::error::CliError;

/// One macro to run from a given mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Mode the macro is declared on.
    pub mode: String,

    /// Macro name.
    pub macro_name: String,
}

impl Step {
    fn new(mode: &str, macro_name: &str) -> Self {
        Self {
            mode: mode.to_string(),
            macro_name: macro_name.to_string(),
        }
    }
}

/// Breadth-first planner over a descriptor's modes.
#[derive(Debug, Clone, Copy)]
pub struct Pathfinder<'a> {
    modes: &'a IndexMap<String, ModeSpec>,
}

impl<'a> Pathfinder<'a> {
    /// Create a planner over a set of modes.
    pub fn new(modes: &'a IndexMap<String, ModeSpec>) -> Self {
        Self { modes }
    }

    /// Outgoing edges of a mode: (macro name, target mode), in declaration order.
    fn edges(&self, mode: &str) -> Vec<(&'a str, &'a str)> {
        self.modes
            .get(mode)
            .into_iter()
            .flat_map(|m| m.macros.values())
            .filter_map(|spec| spec.target.as_deref().map(|t| (spec.name.as_str(), t)))
            .collect()
    }

    /// Breadth-first search until `done` accepts a mode.
    ///
    /// Returns the steps leading to the accepted mode.
    fn search<F>(&self, from: &str, mut done: F) -> Option<(String, Vec<Step>)>
    where
        F: FnMut(&str) -> bool,
    {
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut parent: HashMap<String, Step> = HashMap::new();

        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if done(&current) {
                let mut path = Vec::new();
                let mut node = current.clone();
                while let Some(step) = parent.get(&node) {
                    node = step.mode.clone();
                    path.push(step.clone());
                }
                path.reverse();
                return Some((current, path));
            }

            for (macro_name, target) in self.edges(&current) {
                if visited.insert(target.to_string()) {
                    parent.insert(target.to_string(), Step::new(&current, macro_name));
                    queue.push_back(target.to_string());
                }
            }
        }

        None
    }

    /// Plan the steps that run macro `name` from the nearest mode offering it.
    ///
    /// The last step is the requested macro itself. When the current mode
    /// offers the macro, the plan has exactly one step.
    pub fn plan_macro(&self, from: &str, name: &str) -> Result<Vec<Step>, CliError> {
        let offers = |mode: &str| {
            self.modes
                .get(mode)
                .is_some_and(|m| m.macros.contains_key(name))
        };
        let (mode, mut path) = self.search(from, offers).ok_or_else(|| CliError::NoPath {
            from: from.to_string(),
            name: name.to_string(),
        })?;
        path.push(Step::new(&mode, name));
        Ok(path)
    }

    /// Plan the steps that reach mode `target`.
    pub fn plan_to_mode(&self, from: &str, target: &str) -> Option<Vec<Step>> {
        self.search(from, |mode| mode == target).map(|(_, path)| path)
    }

    /// Target mode of a step.
    pub fn target_of(&self, step: &Step) -> Option<&'a str> {
        self.modes
            .get(&step.mode)
            .and_then(|m| m.macros.get(&step.macro_name))
            .and_then(|spec| spec.target.as_deref())
    }

    /// Every mode reachable from `from`, in breadth-first order.
    pub fn reachable(&self, from: &str) -> Vec<String> {
        let mut seen = Vec::new();
        let _ = self.search(from, |mode| {
            seen.push(mode.to_string());
            false
        });
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MacroSpec;

    fn modes() -> IndexMap<String, ModeSpec> {
        let list = vec![
            ModeSpec::initial("ssh")
                .with_macro(MacroSpec::new("enable", None, Some("enable")).with_options(["enable", "disable"])),
            ModeSpec::new("disable", r">$")
                .unwrap()
                .with_macro(MacroSpec::new("enable", Some("enable"), Some("enable")).with_option("enable"))
                .with_macro(MacroSpec::new("configure", Some("enable"), Some("configure")).with_option("enable")),
            ModeSpec::new("enable", r"#$")
                .unwrap()
                .with_macro(
                    MacroSpec::new("configure", Some("configure terminal"), Some("configure"))
                        .with_option("configure"),
                )
                .with_macro(MacroSpec::new("disable", Some("disable"), Some("disable")).with_option("disable")),
            ModeSpec::new("configure", r"\(config\)#$")
                .unwrap()
                .with_macro(MacroSpec::new("end", Some("end"), Some("enable")).with_option("enable"))
                .with_macro(MacroSpec::new("exit", Some("exit"), Some("enable")).with_option("enable")),
        ];
        list.into_iter().map(|m| (m.name.clone(), m)).collect()
    }

    #[test]
    fn test_current_mode_offers_macro() {
        let modes = modes();
        let finder = Pathfinder::new(&modes);
        let plan = finder.plan_macro("disable", "configure").unwrap();
        assert_eq!(plan, vec![Step::new("disable", "configure")]);
    }

    #[test]
    fn test_nearest_mode_offering_macro() {
        let modes = modes();
        let finder = Pathfinder::new(&modes);
        let plan = finder.plan_macro("configure", "disable").unwrap();
        assert_eq!(
            plan,
            vec![Step::new("configure", "end"), Step::new("enable", "disable")]
        );
    }

    #[test]
    fn test_tie_break_on_declaration_order() {
        let modes = modes();
        let finder = Pathfinder::new(&modes);
        // Both `end` and `exit` lead to enable; `end` is declared first
        let plan = finder.plan_to_mode("configure", "disable").unwrap();
        assert_eq!(
            plan,
            vec![Step::new("configure", "end"), Step::new("enable", "disable")]
        );
    }

    #[test]
    fn test_no_path() {
        let modes = modes();
        let finder = Pathfinder::new(&modes);
        let err = finder.plan_macro("enable", "reload").unwrap_err();
        assert!(matches!(err, CliError::NoPath { .. }));
        assert!(finder.plan_to_mode("enable", "ssh").is_none());
    }

    #[test]
    fn test_reachable_and_targets() {
        let modes = modes();
        let finder = Pathfinder::new(&modes);
        assert_eq!(finder.reachable("ssh"), vec!["ssh", "enable", "configure", "disable"]);
        assert_eq!(finder.target_of(&Step::new("configure", "exit")), Some("enable"));
    }
}

use crate::error::{Error, Result};
use crate::module::ModuleCreator;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Whether a quantity is read or produced by a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityType {
    Input,
    Output,
}

impl fmt::Display for QuantityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantityType::Input => f.write_str("input"),
            QuantityType::Output => f.write_str("output"),
        }
    }
}

/// A named collection of module creators.
///
/// Libraries are plain values; several may coexist and their creators may be
/// mixed freely in one system.
#[derive(Clone, Default)]
pub struct ModuleLibrary {
    name: String,
    creators: BTreeMap<String, Arc<dyn ModuleCreator>>,
}

impl ModuleLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            creators: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a creator under its own name, replacing any previous entry.
    pub fn register(&mut self, creator: Arc<dyn ModuleCreator>) -> &mut Self {
        self.creators.insert(creator.name().to_string(), creator);
        self
    }

    pub fn with(mut self, creator: Arc<dyn ModuleCreator>) -> Self {
        self.register(creator);
        self
    }

    pub fn retrieve(&self, name: &str) -> Result<Arc<dyn ModuleCreator>> {
        self.creators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                library: self.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.creators.contains_key(name)
    }

    /// Names of every registered module, sorted.
    pub fn get_all_modules(&self) -> Vec<String> {
        self.creators.keys().cloned().collect()
    }

    /// One row per (module, quantity) pair in three columns:
    /// `quantity_name`, `module_name` and `quantity_type`.
    pub fn get_all_quantities(&self) -> BTreeMap<String, Vec<String>> {
        let mut quantity_name = Vec::new();
        let mut module_name = Vec::new();
        let mut quantity_type = Vec::new();

        for (module, creator) in &self.creators {
            let rows = creator
                .inputs()
                .iter()
                .map(|q| (q, QuantityType::Input))
                .chain(creator.outputs().iter().map(|q| (q, QuantityType::Output)));
            for (quantity, kind) in rows {
                quantity_name.push(quantity.clone());
                module_name.push(module.clone());
                quantity_type.push(kind.to_string());
            }
        }

        BTreeMap::from([
            ("quantity_name".to_string(), quantity_name),
            ("module_name".to_string(), module_name),
            ("quantity_type".to_string(), quantity_type),
        ])
    }

    /// Text table of [`Self::get_all_quantities`].
    pub fn quantity_report(&self) -> String {
        let table = self.get_all_quantities();
        let names = &table["quantity_name"];
        let modules = &table["module_name"];
        let types = &table["quantity_type"];

        let name_width = names.iter().map(String::len).max().unwrap_or(0).max(13);
        let module_width = modules.iter().map(String::len).max().unwrap_or(0).max(11);

        let mut report = format!(
            "{:<name_width$}  {:<module_width$}  quantity_type\n",
            "quantity_name", "module_name"
        );
        for ((name, module), kind) in names.iter().zip(modules).zip(types) {
            report.push_str(&format!(
                "{name:<name_width$}  {module:<module_width$}  {kind}\n"
            ));
        }
        report
    }
}

impl fmt::Debug for ModuleLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLibrary")
            .field("name", &self.name)
            .field("modules", &self.creators.keys().collect::<Vec<_>>())
            .finish()
    }
}

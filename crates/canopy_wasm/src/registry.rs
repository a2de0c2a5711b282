//! Registry introspection for the bundled module libraries.

use anyhow::anyhow;
use canopy_modules::all_libraries;
use serde_wasm_bindgen::to_value;
use std::collections::BTreeMap;
use wasm_bindgen::prelude::*;

/// Module names per library.
pub fn module_catalog() -> BTreeMap<String, Vec<String>> {
    all_libraries()
        .into_iter()
        .map(|library| (library.name().to_string(), library.get_all_modules()))
        .collect()
}

/// The `quantity_name` / `module_name` / `quantity_type` table for one library.
pub fn library_quantities(library: &str) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    all_libraries()
        .into_iter()
        .find(|candidate| candidate.name() == library)
        .map(|found| found.get_all_quantities())
        .ok_or_else(|| anyhow!("Unknown module library: {}", library))
}

#[wasm_bindgen]
pub fn list_modules() -> Result<JsValue, JsValue> {
    to_value(&module_catalog()).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
pub fn module_quantities(library: &str) -> Result<JsValue, JsValue> {
    let table = library_quantities(library).map_err(|e| JsValue::from_str(&e.to_string()))?;
    to_value(&table).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_both_libraries() {
        let catalog = module_catalog();
        assert_eq!(catalog.len(), 2);
        assert!(catalog["standard"].contains(&"harmonic_oscillator".to_string()));
        assert!(catalog["test"].contains(&"thermal_time_switch".to_string()));
    }

    #[test]
    fn quantities_for_known_and_unknown_library() {
        let table = library_quantities("test").expect("known library");
        assert_eq!(table["module_name"].len(), table["quantity_name"].len());
        assert!(library_quantities("missing").is_err());
    }
}

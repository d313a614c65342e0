use std::{collections::HashMap, sync::Arc};

use crate::{
    ast::Signature,
    error::{PipelineError, Result},
};

/// Named circuit source together with the interface it is expected to expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitDefinition {
    pub name: String,
    pub contract_name: String,
    pub signature: Signature,
    pub source: String,
}

impl CircuitDefinition {
    pub fn new(
        name: impl Into<String>,
        contract_name: impl Into<String>,
        signature: Signature,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            contract_name: contract_name.into(),
            signature,
            source: source.into(),
        }
    }
}

/// Immutable, ordered set of circuit definitions.
#[derive(Debug, Clone, Default)]
pub struct CircuitCatalog {
    definitions: Vec<Arc<CircuitDefinition>>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    definitions: Vec<CircuitDefinition>,
}

impl CatalogBuilder {
    pub fn register(mut self, definition: CircuitDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn build(self) -> Result<CircuitCatalog> {
        let mut catalog = CircuitCatalog::default();
        for definition in self.definitions {
            if catalog.index.contains_key(&definition.name) {
                return Err(PipelineError::DuplicateCircuit {
                    name: definition.name,
                });
            }
            catalog
                .index
                .insert(definition.name.clone(), catalog.definitions.len());
            catalog.definitions.push(Arc::new(definition));
        }
        Ok(catalog)
    }
}

impl CircuitCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The age-check family of circuits and the minimal circuits used to exercise the toolchain.
    pub fn builtin() -> Self {
        let age_check = Signature::new()
            .private_field("age")
            .public_field("challenge_id")
            .returns_field();
        let age_check_plus_field = age_check.clone().public_field("addField");
        let age_check_array = Signature::new()
            .private_field("age")
            .public_field("challenge_id")
            .public_array("addField", 100)
            .returns_field();

        let definitions = vec![
            CircuitDefinition::new(
                "empty",
                "EmptyCircuit",
                Signature::new(),
                "def main() {\n    return;\n}\n",
            ),
            CircuitDefinition::new(
                "a_square",
                "ASquareCircuit",
                Signature::new().private_field("a").returns_field(),
                "def main(private field a) -> field {\n    return a * a;\n}\n",
            ),
            CircuitDefinition::new(
                "only_assert",
                "OnlyAssert",
                Signature::new().private_field("age"),
                "def main(private field age) {\n    assert(age > 18);\n    return;\n}\n",
            ),
            CircuitDefinition::new(
                "basic_age_check",
                "BasicAgeCheckImplementation",
                age_check,
                "def main(private field age, field challenge_id) -> field {
    assert(age > 18 && challenge_id > 0);
    field proofedAge = (age >= 18) ? 1 : 0;
    return proofedAge * challenge_id;
}
",
            ),
            CircuitDefinition::new(
                "basic_age_check_plus_field",
                "BasicAgeCheckImplementationPlusField",
                age_check_plus_field.clone(),
                "def main(private field age, field challenge_id, field addField) -> field {
    assert(age > 18 && challenge_id > 0);
    field proofedAge = (age >= 18) ? 1 : 0;
    return proofedAge * challenge_id;
}
",
            ),
            CircuitDefinition::new(
                "basic_age_check_plus_field_multiple",
                "BasicAgeCheckPlusFieldMultiple",
                age_check_plus_field,
                "def main(private field age, field challenge_id, field addField) -> field {
    assert(age > 18 && challenge_id > 0);
    field proofedAge = (age >= 18) ? 1 : 0;
    return proofedAge * challenge_id * addField;
}
",
            ),
            CircuitDefinition::new(
                "age_check_one_hundred_array",
                "AgeCheckWithOneHundredArray",
                age_check_array.clone(),
                "def main(private field age, field challenge_id, field[100] addField) -> field {
    assert(age > 18 && challenge_id > 0);
    field proofedAge = (age >= 18) ? 1 : 0;
    return proofedAge * challenge_id;
}
",
            ),
            CircuitDefinition::new(
                "age_check_one_hundred_for",
                "AgeCheckWithOneHundredFor",
                age_check_array,
                "def main(private field age, field challenge_id, field[100] addField) -> field {
    assert(age > 18 && challenge_id > 0);
    field mut proofedAge = (age >= 18) ? 1 : 0;
    for u32 i in 0..100 {
        proofedAge = proofedAge + addField[i];
    }
    return proofedAge * challenge_id;
}
",
            ),
        ];

        // the built-in names are distinct
        let mut catalog = CircuitCatalog::default();
        for definition in definitions {
            catalog
                .index
                .insert(definition.name.clone(), catalog.definitions.len());
            catalog.definitions.push(Arc::new(definition));
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Result<Arc<CircuitDefinition>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.definitions[i]))
            .ok_or_else(|| PipelineError::NotFound {
                name: name.to_string(),
            })
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CircuitDefinition>> {
        self.definitions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn test_builtin_catalog() {
        let catalog = CircuitCatalog::builtin();
        assert_eq!(
            catalog.names(),
            vec![
                "empty",
                "a_square",
                "only_assert",
                "basic_age_check",
                "basic_age_check_plus_field",
                "basic_age_check_plus_field_multiple",
                "age_check_one_hundred_array",
                "age_check_one_hundred_for",
            ]
        );
        let def = catalog.get("basic_age_check").unwrap();
        assert_eq!(def.contract_name, "BasicAgeCheckImplementation");
    }

    #[test]
    fn test_builtin_sources_match_signatures() {
        for def in CircuitCatalog::builtin().iter() {
            let program = parser::parse(&def.source).unwrap();
            assert_eq!(program.signature, def.signature, "{}", def.name);
        }
    }

    #[test]
    fn test_not_found() {
        let err = CircuitCatalog::builtin().get("no_such_circuit").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { ref name } if name == "no_such_circuit"));
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let def = CircuitDefinition::new(
            "a_square",
            "ASquareCircuit",
            Signature::new().private_field("a").returns_field(),
            "def main(private field a) -> field { return a * a; }",
        );
        let catalog = CircuitCatalog::builder().register(def.clone()).build().unwrap();
        assert_eq!(catalog.len(), 1);

        let err = CircuitCatalog::builder()
            .register(def.clone())
            .register(def)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateCircuit { .. }));
    }
}

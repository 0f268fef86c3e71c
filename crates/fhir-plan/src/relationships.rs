//! Static table of reference fields between resource types.
//!
//! The table answers one question for the plan builder: which search field on
//! resource type X references resource type Y? It is built once, never
//! mutated, and handed to [`PlanBuilder`](crate::PlanBuilder) explicitly.

use std::collections::BTreeMap;

/// A reference-valued search field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceField {
    /// Search parameter / element name on the owning type.
    pub field: String,
    /// Resource type the field points at.
    pub target: String,
}

/// Immutable lookup of reference fields per resource type.
///
/// # Example
///
/// ```rust
/// use fhir_plan::RelationshipTable;
///
/// let table = RelationshipTable::builder()
///     .reference("Observation", "subject", "Patient")
///     .reference("Observation", "encounter", "Encounter")
///     .build();
///
/// assert_eq!(table.field_referencing("Observation", "Patient"), Some("subject"));
/// assert_eq!(table.field_referencing("Patient", "Observation"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipTable {
    fields: BTreeMap<String, Vec<ReferenceField>>,
}

impl RelationshipTable {
    /// Starts an empty table.
    pub fn builder() -> RelationshipTableBuilder {
        RelationshipTableBuilder::default()
    }

    /// The reference fields of the common FHIR R4 clinical resources.
    pub fn fhir_default() -> Self {
        Self::builder()
            .reference("Patient", "general-practitioner", "Practitioner")
            .reference("Patient", "organization", "Organization")
            .reference("Observation", "subject", "Patient")
            .reference("Observation", "encounter", "Encounter")
            .reference("Observation", "performer", "Practitioner")
            .reference("Observation", "has-member", "Observation")
            .reference("Observation", "based-on", "ServiceRequest")
            .reference("Condition", "subject", "Patient")
            .reference("Condition", "encounter", "Encounter")
            .reference("Condition", "asserter", "Practitioner")
            .reference("Encounter", "subject", "Patient")
            .reference("Encounter", "service-provider", "Organization")
            .reference("Encounter", "part-of", "Encounter")
            .reference("Encounter", "practitioner", "Practitioner")
            .reference("MedicationRequest", "subject", "Patient")
            .reference("MedicationRequest", "encounter", "Encounter")
            .reference("MedicationRequest", "requester", "Practitioner")
            .reference("MedicationRequest", "medication", "Medication")
            .reference("Procedure", "subject", "Patient")
            .reference("Procedure", "encounter", "Encounter")
            .reference("Procedure", "performer", "Practitioner")
            .reference("DiagnosticReport", "subject", "Patient")
            .reference("DiagnosticReport", "encounter", "Encounter")
            .reference("DiagnosticReport", "result", "Observation")
            .reference("DiagnosticReport", "performer", "Practitioner")
            .reference("Immunization", "patient", "Patient")
            .reference("AllergyIntolerance", "patient", "Patient")
            .reference("AllergyIntolerance", "recorder", "Practitioner")
            .reference("CarePlan", "subject", "Patient")
            .reference("CarePlan", "encounter", "Encounter")
            .reference("ServiceRequest", "subject", "Patient")
            .reference("ServiceRequest", "requester", "Practitioner")
            .reference("Organization", "partof", "Organization")
            .reference("Location", "partof", "Location")
            .reference("Location", "organization", "Organization")
            .reference("PractitionerRole", "practitioner", "Practitioner")
            .reference("PractitionerRole", "organization", "Organization")
            .build()
    }

    /// First declared field on `from` that references `to`.
    pub fn field_referencing(&self, from: &str, to: &str) -> Option<&str> {
        self.fields
            .get(from)?
            .iter()
            .find(|f| f.target == to)
            .map(|f| f.field.as_str())
    }

    /// All reference fields declared for a resource type.
    pub fn fields_of(&self, resource_type: &str) -> &[ReferenceField] {
        self.fields
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of resource types with at least one reference field.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the table holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builder for [`RelationshipTable`].
#[derive(Debug, Clone, Default)]
pub struct RelationshipTableBuilder {
    fields: BTreeMap<String, Vec<ReferenceField>>,
}

impl RelationshipTableBuilder {
    /// Declares that `field` on `from` references `target`.
    ///
    /// Declaring the same (type, field, target) twice has no effect.
    pub fn reference(
        mut self,
        from: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let entry = ReferenceField {
            field: field.into(),
            target: target.into(),
        };
        let fields = self.fields.entry(from.into()).or_default();
        if !fields.contains(&entry) {
            fields.push(entry);
        }
        self
    }

    /// Freezes the table.
    pub fn build(self) -> RelationshipTable {
        RelationshipTable {
            fields: self.fields,
        }
    }
}

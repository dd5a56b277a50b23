//! Static R4 search parameter table.
//!
//! Paths use [`JsonPath::from_dotted`](crate::path::JsonPath::from_dotted) notation. A
//! parameter with several paths indexes the union of their values.

use crate::parameters::{ParamSpec, SearchParameterType};
use crate::registry::SearchParameterRegistry;

use SearchParameterType::{Date, Number, Reference, String as Str, Token};

struct Def {
    code: &'static str,
    kind: SearchParameterType,
    paths: &'static [&'static str],
    targets: &'static [&'static str],
}

const fn def(
    code: &'static str,
    kind: SearchParameterType,
    paths: &'static [&'static str],
) -> Def {
    Def {
        code,
        kind,
        paths,
        targets: &[],
    }
}

const fn reference(
    code: &'static str,
    paths: &'static [&'static str],
    targets: &'static [&'static str],
) -> Def {
    Def {
        code,
        kind: Reference,
        paths,
        targets,
    }
}

const SUBJECT_TARGETS: &[&str] = &["Patient", "Group"];
const PERFORMER_TARGETS: &[&str] = &["Practitioner", "PractitionerRole", "Organization", "Patient"];

const PATIENT: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("name", Str, &["name"]),
    def("family", Str, &["name.family"]),
    def("given", Str, &["name.given"]),
    def("gender", Token, &["gender"]),
    def("birthdate", Date, &["birthDate"]),
    def("active", Token, &["active"]),
    def("telecom", Token, &["telecom"]),
    def("address", Str, &["address"]),
    def("address-city", Str, &["address.city"]),
    def("address-postalcode", Str, &["address.postalCode"]),
    def("death-date", Date, &["deceasedDateTime"]),
    reference(
        "general-practitioner",
        &["generalPractitioner"],
        &["Practitioner", "PractitionerRole", "Organization"],
    ),
    reference("organization", &["managingOrganization"], &["Organization"]),
    reference("link", &["link.other"], &["Patient", "RelatedPerson"]),
];

const PRACTITIONER: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("name", Str, &["name"]),
    def("family", Str, &["name.family"]),
    def("given", Str, &["name.given"]),
    def("gender", Token, &["gender"]),
    def("active", Token, &["active"]),
    def("telecom", Token, &["telecom"]),
    def("address", Str, &["address"]),
];

const PRACTITIONER_ROLE: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("role", Token, &["code"]),
    def("specialty", Token, &["specialty"]),
    def("active", Token, &["active"]),
    def("date", Date, &["period"]),
    reference("practitioner", &["practitioner"], &["Practitioner"]),
    reference("organization", &["organization"], &["Organization"]),
];

const ORGANIZATION: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("name", Str, &["name", "alias"]),
    def("type", Token, &["type"]),
    def("active", Token, &["active"]),
    def("address", Str, &["address"]),
    def("address-city", Str, &["address.city"]),
    reference("partof", &["partOf"], &["Organization"]),
];

const ENCOUNTER: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("status", Token, &["status"]),
    def("class", Token, &["class"]),
    def("type", Token, &["type"]),
    def("date", Date, &["period"]),
    def("reason-code", Token, &["reasonCode"]),
    reference("subject", &["subject"], SUBJECT_TARGETS),
    reference("patient", &["subject"], &["Patient"]),
    reference(
        "participant",
        &["participant.individual"],
        &["Practitioner", "PractitionerRole", "RelatedPerson"],
    ),
    reference("practitioner", &["participant.individual"], &["Practitioner"]),
    reference("service-provider", &["serviceProvider"], &["Organization"]),
];

const OBSERVATION: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("status", Token, &["status"]),
    def("code", Token, &["code"]),
    def("category", Token, &["category"]),
    def("date", Date, &["effective[x]"]),
    def("value-quantity", Number, &["valueQuantity"]),
    def("value-concept", Token, &["valueCodeableConcept"]),
    def("value-string", Str, &["valueString"]),
    def("value-date", Date, &["valueDateTime", "valuePeriod"]),
    reference(
        "subject",
        &["subject"],
        &["Patient", "Group", "Device", "Location"],
    ),
    reference("patient", &["subject"], &["Patient"]),
    reference("encounter", &["encounter"], &["Encounter"]),
    reference("performer", &["performer"], PERFORMER_TARGETS),
    reference("has-member", &["hasMember"], &["Observation"]),
    reference("derived-from", &["derivedFrom"], &["Observation", "DiagnosticReport"]),
];

const CONDITION: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("clinical-status", Token, &["clinicalStatus"]),
    def("verification-status", Token, &["verificationStatus"]),
    def("category", Token, &["category"]),
    def("severity", Token, &["severity"]),
    def("code", Token, &["code"]),
    def("body-site", Token, &["bodySite"]),
    def("onset-date", Date, &["onset[x]"]),
    def("abatement-date", Date, &["abatement[x]"]),
    def("recorded-date", Date, &["recordedDate"]),
    reference("subject", &["subject"], SUBJECT_TARGETS),
    reference("patient", &["subject"], &["Patient"]),
    reference("encounter", &["encounter"], &["Encounter"]),
    reference(
        "asserter",
        &["asserter"],
        &["Practitioner", "PractitionerRole", "Patient", "RelatedPerson"],
    ),
];

const PROCEDURE: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("status", Token, &["status"]),
    def("code", Token, &["code"]),
    def("category", Token, &["category"]),
    def("date", Date, &["performed[x]"]),
    def("reason-code", Token, &["reasonCode"]),
    reference("subject", &["subject"], SUBJECT_TARGETS),
    reference("patient", &["subject"], &["Patient"]),
    reference("encounter", &["encounter"], &["Encounter"]),
    reference("performer", &["performer.actor"], PERFORMER_TARGETS),
];

const MEDICATION_REQUEST: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("status", Token, &["status"]),
    def("intent", Token, &["intent"]),
    def("category", Token, &["category"]),
    def("code", Token, &["medicationCodeableConcept"]),
    def("authoredon", Date, &["authoredOn"]),
    reference("medication", &["medicationReference"], &["Medication"]),
    reference("subject", &["subject"], SUBJECT_TARGETS),
    reference("patient", &["subject"], &["Patient"]),
    reference("encounter", &["encounter"], &["Encounter"]),
    reference("requester", &["requester"], PERFORMER_TARGETS),
];

const MEDICATION: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("code", Token, &["code"]),
    def("status", Token, &["status"]),
    def("form", Token, &["form"]),
    def("lot-number", Token, &["batch.lotNumber"]),
    def("expiration-date", Date, &["batch.expirationDate"]),
    reference("manufacturer", &["manufacturer"], &["Organization"]),
];

const DIAGNOSTIC_REPORT: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("status", Token, &["status"]),
    def("code", Token, &["code"]),
    def("category", Token, &["category"]),
    def("conclusion", Token, &["conclusionCode"]),
    def("date", Date, &["effective[x]"]),
    def("issued", Date, &["issued"]),
    reference(
        "subject",
        &["subject"],
        &["Patient", "Group", "Device", "Location"],
    ),
    reference("patient", &["subject"], &["Patient"]),
    reference("encounter", &["encounter"], &["Encounter"]),
    reference("result", &["result"], &["Observation"]),
    reference(
        "performer",
        &["performer"],
        &["Practitioner", "PractitionerRole", "Organization"],
    ),
];

const ALLERGY_INTOLERANCE: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("clinical-status", Token, &["clinicalStatus"]),
    def("verification-status", Token, &["verificationStatus"]),
    def("type", Token, &["type"]),
    def("category", Token, &["category"]),
    def("criticality", Token, &["criticality"]),
    def("code", Token, &["code", "reaction.substance"]),
    def("date", Date, &["recordedDate"]),
    def("last-date", Date, &["lastOccurrence"]),
    reference("patient", &["patient"], &["Patient"]),
    reference(
        "recorder",
        &["recorder"],
        &["Practitioner", "PractitionerRole", "Patient", "RelatedPerson"],
    ),
    reference(
        "asserter",
        &["asserter"],
        &["Practitioner", "PractitionerRole", "Patient", "RelatedPerson"],
    ),
];

const IMMUNIZATION: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("status", Token, &["status"]),
    def("vaccine-code", Token, &["vaccineCode"]),
    def("lot-number", Str, &["lotNumber"]),
    def("reason-code", Token, &["reasonCode"]),
    def("date", Date, &["occurrence[x]"]),
    reference("patient", &["patient"], &["Patient"]),
    reference(
        "performer",
        &["performer.actor"],
        &["Practitioner", "PractitionerRole", "Organization"],
    ),
    reference("location", &["location"], &["Location"]),
];

const RISK_ASSESSMENT: &[Def] = &[
    def("identifier", Token, &["identifier"]),
    def("method", Token, &["method"]),
    def("risk", Token, &["prediction.qualitativeRisk"]),
    def("probability", Number, &["prediction.probability[x]"]),
    def("date", Date, &["occurrence[x]"]),
    reference("subject", &["subject"], SUBJECT_TARGETS),
    reference("patient", &["subject"], &["Patient"]),
    reference("encounter", &["encounter"], &["Encounter"]),
    reference("condition", &["condition"], &["Condition"]),
    reference(
        "performer",
        &["performer"],
        &["Practitioner", "PractitionerRole", "Device"],
    ),
];

const TABLE: &[(&str, &[Def])] = &[
    ("Patient", PATIENT),
    ("Practitioner", PRACTITIONER),
    ("PractitionerRole", PRACTITIONER_ROLE),
    ("Organization", ORGANIZATION),
    ("Encounter", ENCOUNTER),
    ("Observation", OBSERVATION),
    ("Condition", CONDITION),
    ("Procedure", PROCEDURE),
    ("MedicationRequest", MEDICATION_REQUEST),
    ("Medication", MEDICATION),
    ("DiagnosticReport", DIAGNOSTIC_REPORT),
    ("AllergyIntolerance", ALLERGY_INTOLERANCE),
    ("Immunization", IMMUNIZATION),
    ("RiskAssessment", RISK_ASSESSMENT),
];

/// Register the per-type R4 parameters.
pub fn register_r4_parameters(registry: &SearchParameterRegistry) {
    for (resource_type, defs) in TABLE {
        for d in *defs {
            registry.register(
                resource_type,
                ParamSpec::new(d.code, d.kind, d.paths).with_targets(d.targets),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_parameters_have_targets() {
        for (resource_type, defs) in TABLE {
            for d in *defs {
                if d.kind == Reference {
                    assert!(!d.targets.is_empty(), "{resource_type}.{}", d.code);
                } else {
                    assert!(d.targets.is_empty(), "{resource_type}.{}", d.code);
                }
            }
        }
    }

    #[test]
    fn test_table_types_are_standard() {
        for (resource_type, _) in TABLE {
            assert!(octofhir_core::is_known_resource_type(resource_type));
        }
    }

    #[test]
    fn test_number_parameters_registered() {
        let registry = SearchParameterRegistry::new();
        register_r4_parameters(&registry);
        assert_eq!(
            registry.lookup("RiskAssessment", "probability").map(|p| p.param_type),
            Some(Number)
        );
        assert_eq!(
            registry.lookup("Observation", "value-quantity").map(|p| p.param_type),
            Some(Number)
        );
    }
}

//! Built-in conformance suite over the fixtures in `data/`.

use tabula_protocol::{Property, PropertyType, Schema};

use crate::conformance::{Case, ExpectedValue, RecordCheck};

fn schema(name: &str, properties: &[(&str, PropertyType)]) -> Schema {
    Schema::new(
        name,
        properties
            .iter()
            .map(|(n, t)| Property::new(*n, *t))
            .collect(),
    )
}

fn animals_schema() -> Schema {
    schema(
        "animals",
        &[
            ("id", PropertyType::Integer),
            ("name", PropertyType::String),
            ("extinct", PropertyType::Boolean),
            ("last_spotted", PropertyType::DateTime),
        ],
    )
}

fn logs_schema() -> Schema {
    schema(
        "logs",
        &[
            ("timestamp", PropertyType::DateTime),
            ("event", PropertyType::String),
            ("magnitude", PropertyType::Number),
        ],
    )
}

fn people_schema() -> Schema {
    schema(
        "people",
        &[
            ("id", PropertyType::Integer),
            ("first_name", PropertyType::String),
            ("last_name", PropertyType::String),
            ("email", PropertyType::String),
            ("gender", PropertyType::String),
            ("ip_address", PropertyType::String),
        ],
    )
}

fn garbage_schema() -> Schema {
    schema(
        "garbage",
        &[
            ("key", PropertyType::String),
            ("interleaved", PropertyType::String),
            ("count", PropertyType::Integer),
            ("is", PropertyType::Boolean),
            ("math", PropertyType::String),
            ("result", PropertyType::Number),
            ("epoch", PropertyType::DateTime),
        ],
    )
}

fn text(value: &str) -> ExpectedValue {
    ExpectedValue::text(value)
}

/// The four standard cases, in run order.
pub fn builtin_cases() -> Vec<Case> {
    vec![
        Case {
            name: "animals".to_string(),
            description: "Single file with one malformed boolean and mixed date formats"
                .to_string(),
            pattern: "animals.csv".to_string(),
            expected_schemas: vec![animals_schema()],
            publish_schema: animals_schema(),
            expected_count: 100,
            checks: vec![
                RecordCheck::required(1, text("Vulpes chama")),
                RecordCheck::invalid(
                    1,
                    text("Macropus fuliginosus"),
                    " because blue is not a valid boolean",
                ),
                RecordCheck::parsing(
                    0,
                    ExpectedValue::Number(52.0),
                    0,
                    ExpectedValue::Number(52.0),
                    "",
                ),
                RecordCheck::parsing(
                    0,
                    ExpectedValue::Number(83.0),
                    3,
                    ExpectedValue::datetime("1796-07-23T00:00:00.000Z"),
                    "",
                ),
            ],
        },
        Case {
            name: "logs".to_string(),
            description: "Wildcard over every fixture; two files share the logs header"
                .to_string(),
            pattern: "*.csv".to_string(),
            expected_schemas: vec![animals_schema(), logs_schema(), people_schema()],
            publish_schema: logs_schema(),
            expected_count: 300,
            checks: vec![
                RecordCheck::required(1, text("社會科學院語學研究所")),
                RecordCheck::required(1, text("Ω≈ç√∫˜µ≤≥÷")),
                RecordCheck::parsing(
                    1,
                    text("normal"),
                    2,
                    ExpectedValue::Number(27.78092),
                    "",
                ),
            ],
        },
        Case {
            name: "people".to_string(),
            description: "Three files with one header merge into a single schema".to_string(),
            pattern: "people.*.csv".to_string(),
            expected_schemas: vec![people_schema()],
            publish_schema: people_schema(),
            expected_count: 3000,
            checks: vec![
                RecordCheck::required(3, text("lroylr4@indiatimes.com")),
                RecordCheck::required(3, text("mbranstoncs@mit.edu")),
                RecordCheck::required(3, text("bmageei@linkedin.com")),
            ],
        },
        Case {
            name: "garbage".to_string(),
            description: "Columns where the majority type must win over noise".to_string(),
            pattern: "garbage.csv".to_string(),
            expected_schemas: vec![garbage_schema()],
            publish_schema: garbage_schema(),
            expected_count: 10,
            checks: vec![
                RecordCheck::required(0, text("a")),
                RecordCheck::parsing(0, text("a"), 1, text("1"), ""),
                RecordCheck::parsing(
                    0,
                    text("b"),
                    2,
                    ExpectedValue::Null,
                    " because seventeen is not an integer",
                ),
                RecordCheck::parsing(0, text("d"), 3, ExpectedValue::Bool(true), ""),
                RecordCheck::parsing(0, text("g"), 4, text("12"), ""),
                // Time of day is dropped: dates convert to midnight
                RecordCheck::parsing(
                    0,
                    text("i"),
                    6,
                    ExpectedValue::datetime("1970-01-06T00:00:00.000Z"),
                    "",
                ),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_names_are_unique_and_ordered() {
        let names: Vec<String> = builtin_cases().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["animals", "logs", "people", "garbage"]);
    }

    #[test]
    fn test_publish_schema_is_expected() {
        for case in builtin_cases() {
            assert!(
                case.expected_schemas
                    .iter()
                    .any(|s| s.signature_eq(&case.publish_schema)),
                "{} publishes a schema it does not expect",
                case.name
            );
        }
    }

    #[test]
    fn test_every_case_has_a_required_check() {
        for case in builtin_cases() {
            assert!(case.checks.iter().any(|c| !c.is_bonus()), "{}", case.name);
        }
    }
}

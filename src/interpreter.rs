//! Keyword interpreter
//!
//! A rule-based stand-in for the interpreter role: turns a plain-language
//! question into a SQL query over `df`, using the table's schema to resolve
//! which columns the question talks about.

use crate::dataset::{ColumnSchema, PrimitiveType};
use crate::error::{DataExpError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Questions offered as one-click shortcuts by the front end
pub const QUICK_QUESTIONS: &[&str] = &[
    "What's the overall survival rate?",
    "How many passengers were in each class?",
    "What was the average age of passengers?",
    "Show me survival rate by gender",
    "How many children were on board?",
    "What's the survival rate by passenger class?",
    "Show me the age distribution",
    "Which deck had the most passengers?",
    "What was the fare range?",
    "Show me passenger embarkation ports",
];

const OUTCOME_TERMS: &[&str] = &["surviv", "died", "death"];
const OUTCOME_COLUMNS: &[&str] = &["survived", "outcome"];
const ADULT_AGE: u32 = 18;

/// Words that refer to a column without naming it
const SYNONYMS: &[(&str, &[&str])] = &[
    ("gender", &["sex", "gender"]),
    ("sex", &["sex", "gender"]),
    ("class", &["pclass", "class"]),
    ("embark", &["embarked"]),
    ("port", &["embarked"]),
    ("ticket price", &["fare"]),
];

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z0-9_]+").expect("valid word pattern");
}

/// SQL chosen for a question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub question: String,
    pub sql: String,
    /// Which rule produced the query
    pub rationale: String,
}

pub struct KeywordInterpreter {
    columns: Vec<ColumnSchema>,
}

impl KeywordInterpreter {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn interpret(&self, question: &str) -> Result<QueryPlan> {
        let q = question.trim().to_lowercase();
        let words: Vec<&str> = WORD.find_iter(&q).map(|m| m.as_str()).collect();

        let plan = |sql: String, rationale: &str| QueryPlan {
            question: question.trim().to_string(),
            sql,
            rationale: rationale.to_string(),
        };

        if words.first().is_some_and(|w| *w == "select" || *w == "with") {
            return Ok(plan(question.trim().to_string(), "question is already a query"));
        }

        let mentioned = self.mentioned_columns(&q, &words);
        let numeric_mentioned = mentioned
            .iter()
            .copied()
            .find(|c| c.data_type.is_numeric());

        if OUTCOME_TERMS.iter().any(|t| q.contains(t)) {
            if let Some(outcome) = self.column_named(OUTCOME_COLUMNS) {
                let dimension = mentioned.iter().find(|c| c.name != outcome.name);
                let result = match dimension {
                    Some(dim) => plan(
                        format!(
                            "SELECT {d}, {o}, COUNT(*) as count FROM df GROUP BY {d}, {o} ORDER BY {d}, {o}",
                            d = dim.name,
                            o = outcome.name
                        ),
                        "outcome counts per group",
                    ),
                    None => plan(
                        format!(
                            "SELECT {o}, COUNT(*) as count FROM df GROUP BY {o} ORDER BY {o}",
                            o = outcome.name
                        ),
                        "overall outcome counts",
                    ),
                };
                return Ok(self.logged(result));
            }
        }

        if q.contains("distribution") || q.contains("histogram") {
            if let Some(col) = numeric_mentioned {
                return Ok(self.logged(plan(
                    format!("SELECT {c} FROM df WHERE {c} IS NOT NULL", c = col.name),
                    "values of a numeric column",
                )));
            }
        }

        if words.iter().any(|w| *w == "children" || *w == "child" || *w == "kids") {
            if let Some(age) = self.column_named(&["age"]) {
                return Ok(self.logged(plan(
                    format!(
                        "SELECT COUNT(*) as children FROM df WHERE {a} < {limit}",
                        a = age.name,
                        limit = ADULT_AGE
                    ),
                    "rows below the adult age",
                )));
            }
        }

        if words.iter().any(|w| matches!(*w, "average" | "mean" | "avg")) {
            if let Some(col) = numeric_mentioned {
                return Ok(self.logged(plan(
                    format!(
                        "SELECT AVG({c}) as avg_{alias} FROM df WHERE {c} IS NOT NULL",
                        c = col.name,
                        alias = col.name.to_lowercase()
                    ),
                    "average of a numeric column",
                )));
            }
        }

        if words.iter().any(|w| matches!(*w, "range" | "min" | "max" | "minimum" | "maximum")) {
            if let Some(col) = numeric_mentioned {
                let alias = col.name.to_lowercase();
                return Ok(self.logged(plan(
                    format!(
                        "SELECT MIN({c}) as min_{a}, MAX({c}) as max_{a}, AVG({c}) as avg_{a} FROM df",
                        c = col.name,
                        a = alias
                    ),
                    "range of a numeric column",
                )));
            }
        }

        if words.contains(&"deck") {
            if let Some(cabin) = self.column_named(&["cabin"]) {
                return Ok(self.logged(plan(
                    format!(
                        "SELECT SUBSTR({c}, 1, 1) as deck, COUNT(*) as count FROM df \
                         WHERE {c} IS NOT NULL GROUP BY SUBSTR({c}, 1, 1) ORDER BY count DESC, deck",
                        c = cabin.name
                    ),
                    "rows per deck letter",
                )));
            }
        }

        let grouped = words
            .iter()
            .any(|w| matches!(*w, "each" | "per" | "by" | "ports" | "breakdown"));
        if let Some(col) = mentioned.iter().find(|c| grouped || is_categorical(c)) {
            return Ok(self.logged(plan(
                format!(
                    "SELECT {c}, COUNT(*) as count FROM df WHERE {c} IS NOT NULL GROUP BY {c} ORDER BY {c}",
                    c = col.name
                ),
                "rows per category",
            )));
        }

        if q.contains("how many") || q.contains("number of") || words.contains(&"count") {
            return Ok(self.logged(plan(
                "SELECT COUNT(*) as count FROM df".to_string(),
                "total row count",
            )));
        }

        Err(DataExpError::Parse(format!(
            "Could not map the question to a query: '{}'",
            question.trim()
        )))
    }

    fn logged(&self, plan: QueryPlan) -> QueryPlan {
        debug!(rationale = %plan.rationale, "Interpreted '{}' as: {}", plan.question, plan.sql);
        plan
    }

    fn column_named(&self, names: &[&str]) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| names.contains(&c.name.to_lowercase().as_str()))
    }

    /// Columns the question refers to, in schema order
    fn mentioned_columns(&self, q: &str, words: &[&str]) -> Vec<&ColumnSchema> {
        self.columns
            .iter()
            .filter(|col| {
                let name = col.name.to_lowercase();
                let by_name = words
                    .iter()
                    .any(|w| *w == name || w.strip_suffix('s') == Some(name.as_str()));
                let by_synonym = SYNONYMS
                    .iter()
                    .any(|(term, targets)| q.contains(term) && targets.contains(&name.as_str()));
                by_name || by_synonym
            })
            .collect()
    }
}

fn is_categorical(col: &ColumnSchema) -> bool {
    matches!(col.data_type, PrimitiveType::String | PrimitiveType::Boolean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titanic_schema() -> Vec<ColumnSchema> {
        [
            ("PassengerId", PrimitiveType::Integer),
            ("Survived", PrimitiveType::Integer),
            ("Pclass", PrimitiveType::Integer),
            ("Name", PrimitiveType::String),
            ("Sex", PrimitiveType::String),
            ("Age", PrimitiveType::Float),
            ("Fare", PrimitiveType::Float),
            ("Cabin", PrimitiveType::String),
            ("Embarked", PrimitiveType::String),
        ]
        .into_iter()
        .map(|(name, data_type)| ColumnSchema {
            name: name.to_string(),
            data_type,
        })
        .collect()
    }

    fn sql_for(question: &str) -> String {
        KeywordInterpreter::new(titanic_schema())
            .interpret(question)
            .unwrap()
            .sql
    }

    #[test]
    fn test_survival_questions() {
        assert_eq!(
            sql_for("What's the overall survival rate?"),
            "SELECT Survived, COUNT(*) as count FROM df GROUP BY Survived ORDER BY Survived"
        );
        assert_eq!(
            sql_for("Show me survival rate by gender"),
            "SELECT Sex, Survived, COUNT(*) as count FROM df GROUP BY Sex, Survived ORDER BY Sex, Survived"
        );
        assert!(sql_for("What's the survival rate by passenger class?").starts_with("SELECT Pclass, Survived"));
    }

    #[test]
    fn test_numeric_questions() {
        assert_eq!(
            sql_for("What was the average age of passengers?"),
            "SELECT AVG(Age) as avg_age FROM df WHERE Age IS NOT NULL"
        );
        assert_eq!(
            sql_for("Show me the age distribution"),
            "SELECT Age FROM df WHERE Age IS NOT NULL"
        );
        assert!(sql_for("What was the fare range?").contains("MAX(Fare) as max_fare"));
        assert_eq!(
            sql_for("How many children were on board?"),
            "SELECT COUNT(*) as children FROM df WHERE Age < 18"
        );
    }

    #[test]
    fn test_grouping_questions() {
        assert_eq!(
            sql_for("How many passengers were in each class?"),
            "SELECT Pclass, COUNT(*) as count FROM df WHERE Pclass IS NOT NULL GROUP BY Pclass ORDER BY Pclass"
        );
        assert!(sql_for("Show me passenger embarkation ports").starts_with("SELECT Embarked, COUNT(*)"));
        assert!(sql_for("Which deck had the most passengers?").contains("SUBSTR(Cabin, 1, 1)"));
    }

    #[test]
    fn test_every_quick_question_is_understood() {
        let interpreter = KeywordInterpreter::new(titanic_schema());
        for question in QUICK_QUESTIONS {
            assert!(interpreter.interpret(question).is_ok(), "{}", question);
        }
    }

    #[test]
    fn test_raw_sql_passes_through() {
        assert_eq!(sql_for("  SELECT * FROM df LIMIT 3 "), "SELECT * FROM df LIMIT 3");
    }

    #[test]
    fn test_unmappable_question_is_error() {
        let err = KeywordInterpreter::new(titanic_schema())
            .interpret("Tell me a joke")
            .unwrap_err();
        assert!(matches!(err, DataExpError::Parse(_)));
    }
}

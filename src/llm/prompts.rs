use minijinja::{Environment, context};
use std::sync::LazyLock;

use crate::connection::ApiEndpoint;

/// Returned by the model when a request cannot be answered from the schema.
pub const UNANSWERABLE_SQL: &str =
    "SELECT 'Unable to answer this question with the available schema' AS error";

const SQL_PROMPT: &str = r#"You are an expert {{ dialect }} query writer.
Translate the user's request into a single read-only {{ dialect }} query against the database "{{ database }}".

Database schema:
{{ schema }}

Rules:
1. Return only the query. No explanations, no prose, no markdown.
2. Never emit statements that modify data or structure (no DROP, DELETE, UPDATE, INSERT, TRUNCATE, ALTER, CREATE, GRANT, REVOKE or EXEC).
3. Prefer bounded result sets: add LIMIT {{ row_limit }} unless the request asks for an aggregate.
4. If the request cannot be answered from this schema, return exactly: {{ unanswerable }}
{%- if simple_select_only %}
5. The backend only understands SELECT <columns> FROM <table> [LIMIT n] and SELECT COUNT(*) FROM <table>. Do not use WHERE, JOIN, GROUP BY, ORDER BY or functions.
{%- endif %}

Request: {{ question }}
"#;

const API_PROMPT: &str = r#"You are choosing the HTTP API call that best answers a user's request.

Available endpoints:
{% for endpoint in endpoints -%}
- {{ endpoint.method }} {{ endpoint.path }}{% if endpoint.description %}: {{ endpoint.description }}{% endif %}
{% endfor %}
Request: {{ question }}

Pick the closest endpoint. You may fill in path parameters and add query parameters.
Respond with only a JSON object and no prose:
{"method": "GET", "path": "/resource?param=value", "description": "what the call returns"}
Add a "body" object only when the endpoint expects a JSON request body.
If no endpoint fits, respond with:
{"error": "no matching endpoint", "reason": "why the request cannot be served"}
"#;

const INSIGHT_PROMPT: &str = r#"Summarize the result of a data query for a business user in three or four short sentences.
Point out notable values, outliers or trends. Do not invent figures that are not in the rows.

Question: {{ question }}
Query: {{ query }}
Rows returned: {{ row_count }}
Sample rows (JSON):
{{ sample }}
"#;

static PROMPTS: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("sql", SQL_PROMPT)
        .expect("Failed to add sql prompt");
    env.add_template("api", API_PROMPT)
        .expect("Failed to add api prompt");
    env.add_template("insight", INSIGHT_PROMPT)
        .expect("Failed to add insight prompt");
    env
});

pub struct SqlPrompt<'a> {
    pub dialect: &'a str,
    pub database: &'a str,
    pub schema: &'a str,
    pub question: &'a str,
    pub row_limit: usize,
    pub simple_select_only: bool,
}

pub fn render_sql_prompt(prompt: &SqlPrompt<'_>) -> Result<String, minijinja::Error> {
    PROMPTS.get_template("sql")?.render(context! {
        dialect => prompt.dialect,
        database => prompt.database,
        schema => prompt.schema,
        question => prompt.question,
        row_limit => prompt.row_limit,
        simple_select_only => prompt.simple_select_only,
        unanswerable => UNANSWERABLE_SQL,
    })
}

pub fn render_api_prompt(
    endpoints: &[ApiEndpoint],
    question: &str,
) -> Result<String, minijinja::Error> {
    PROMPTS.get_template("api")?.render(context! {
        endpoints => endpoints,
        question => question,
    })
}

pub fn render_insight_prompt(
    question: &str,
    query: &str,
    row_count: usize,
    sample: &str,
) -> Result<String, minijinja::Error> {
    PROMPTS.get_template("insight")?.render(context! {
        question => question,
        query => query,
        row_count => row_count,
        sample => sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_prompt_carries_dialect_schema_and_sentinel() {
        let prompt = render_sql_prompt(&SqlPrompt {
            dialect: "MySQL",
            database: "shop",
            schema: "Table: users\nColumns: id (int), name (text)",
            question: "show all users",
            row_limit: 100,
            simple_select_only: false,
        })
        .unwrap();

        assert!(prompt.contains("expert MySQL query writer"));
        assert!(prompt.contains("\"shop\""));
        assert!(prompt.contains("Table: users\nColumns: id (int), name (text)"));
        assert!(prompt.contains(UNANSWERABLE_SQL));
        assert!(prompt.contains("LIMIT 100"));
        assert!(!prompt.contains("only understands SELECT"));
        assert!(prompt.trim_end().ends_with("Request: show all users"));
    }

    #[test]
    fn test_sql_prompt_restricts_simple_backends() {
        let prompt = render_sql_prompt(&SqlPrompt {
            dialect: "ANSI SQL",
            database: "default",
            schema: "",
            question: "count orders",
            row_limit: 50,
            simple_select_only: true,
        })
        .unwrap();
        assert!(prompt.contains("only understands SELECT"));
    }

    #[test]
    fn test_api_prompt_lists_endpoints() {
        let endpoints = vec![
            ApiEndpoint {
                method: "GET".to_string(),
                path: "/albums".to_string(),
                description: "All albums".to_string(),
            },
            ApiEndpoint {
                method: "GET".to_string(),
                path: "/posts".to_string(),
                description: String::new(),
            },
        ];

        let prompt = render_api_prompt(&endpoints, "show albums").unwrap();
        assert!(prompt.contains("- GET /albums: All albums\n"));
        assert!(prompt.contains("- GET /posts\n"));
        assert!(prompt.contains("\"method\": \"GET\""));
    }
}

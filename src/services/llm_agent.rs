//! The language-model boundary: plan generation and answer summarization.
//!
//! Both operations sit behind the [`LanguageModel`] trait so the session
//! pipeline can be driven by a scripted stub in tests; the production
//! implementation talks to an OpenAI-compatible chat-completion endpoint.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
        CreateChatCompletionRequest, Role,
    },
    Client,
};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppError;
use crate::models::{AnalysisPlan, AnalysisResult, SheetSchema};

/// Grabs the outermost JSON object out of a chatty completion.
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("hard-coded regex"));

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Turn a question plus the workbook schema into an executable plan.
    async fn propose_plan(
        &self,
        question: &str,
        schema: &[SheetSchema],
    ) -> Result<AnalysisPlan, AppError>;

    /// Turn a computed result back into a natural-language answer.
    async fn summarize(
        &self,
        question: &str,
        result: &AnalysisResult,
    ) -> Result<String, AppError>;
}

pub struct OpenAiAgent {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAgent {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, AppError> {
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.1),
            ..Default::default()
        };

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::Generator(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AppError::Generator("empty completion content".to_string()));
        }

        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for OpenAiAgent {
    async fn propose_plan(
        &self,
        question: &str,
        schema: &[SheetSchema],
    ) -> Result<AnalysisPlan, AppError> {
        let messages = vec![
            system_message(planner_system_prompt(&describe_schema(schema))),
            user_message(question.to_string()),
        ];

        let content = self.complete(messages).await?;
        parse_plan(&content)
    }

    async fn summarize(
        &self,
        question: &str,
        result: &AnalysisResult,
    ) -> Result<String, AppError> {
        let messages = vec![user_message(summary_prompt(question, result))];
        self.complete(messages).await
    }
}

fn system_message(content: String) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
        content,
        name: None,
        role: Role::System,
    })
}

fn user_message(content: String) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Text(content),
        name: None,
        role: Role::User,
    })
}

/// One block per sheet: name, columns, and the sample rows as JSON.
pub(crate) fn describe_schema(schema: &[SheetSchema]) -> String {
    schema
        .iter()
        .map(|s| {
            format!(
                "Sheet: \"{}\"\nColumns: {}\nSample Data: {}",
                s.sheet_name,
                s.columns.join(", "),
                serde_json::to_string(&s.sample).unwrap_or_else(|_| "[]".to_string()),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn planner_system_prompt(schema_description: &str) -> String {
    let current_date = Utc::now().format("%Y-%m-%d").to_string();

    format!(
        r#"You are a data analyst. You convert natural-language questions about a spreadsheet workbook into a structured execution plan. The current date is {current_date}.

**WORKBOOK SCHEMA AND SAMPLE DATA**:
The sample rows are the first few rows of each sheet and show the value shapes; the COLUMNS are what you must focus on for your plan.
# START OF SCHEMA #
{schema_description}
# END OF SCHEMA #

**TASK**:
1. Identify the single most relevant sheet.
2. Identify any filters needed to answer the question. Filter values must come from the question, not be invented.
3. Identify the aggregation: "sum", "average", "count", "min" or "max" with its target column, or "list" when the user wants to see rows.
4. For "list", optionally set a row limit.

**RESPONSE FORMAT**:
YOU MUST return ONLY one valid JSON object with this exact shape and nothing else:
{{
  "sheetName": "exact sheet name",
  "reasoning": "brief explanation of why this plan answers the question",
  "filters": [{{"column": "...", "operator": "eq" | "neq" | "gt" | "lt" | "contains", "value": "..."}}],
  "aggregation": {{"type": "sum" | "average" | "count" | "min" | "max" | "list", "column": "..."}},
  "limit": 10
}}"#
    )
}

fn summary_prompt(question: &str, result: &AnalysisResult) -> String {
    let answer_json =
        serde_json::to_string_pretty(&result.answer).unwrap_or_else(|_| "null".to_string());

    format!(
        r#"You are a helpful data analyst assistant.
User Question: "{question}"

We executed a data query plan.
Plan Reasoning: "{reasoning}"
Records Scanned: {record_count}

Calculated Result:
{answer_json}

Please provide a friendly, concise, natural language answer to the user's question based on this result.
If the result is a list of rows, summarize them briefly or present them in a readable markdown table.
Do not mention the internal "plan" or technical details unless relevant to explaining the answer."#,
        reasoning = result.meta.generated_plan.reasoning,
        record_count = result.meta.record_count,
    )
}

/// Pull the JSON object out of the planner's reply and deserialize it.
/// No partial-plan repair: anything malformed is a hard generator failure.
pub(crate) fn parse_plan(response: &str) -> Result<AnalysisPlan, AppError> {
    let json = JSON_OBJECT
        .find(response)
        .ok_or_else(|| {
            AppError::Generator(format!("no JSON object in planner response: {response}"))
        })?
        .as_str();

    serde_json::from_str(json)
        .map_err(|e| AppError::Generator(format!("malformed plan JSON '{json}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregationType, Answer, Record, ResultMeta, Value, SAMPLE_SIZE};
    use smallvec::SmallVec;

    fn sales_schema() -> Vec<SheetSchema> {
        let sample: SmallVec<[Record; SAMPLE_SIZE]> = std::iter::once(Record::from_iter([
            ("Region".to_string(), Value::from("East")),
            ("Amount".to_string(), Value::from(100.0)),
        ]))
        .collect();

        vec![SheetSchema {
            sheet_name: "Sales".to_string(),
            columns: vec!["Region".to_string(), "Amount".to_string()],
            row_count: 3,
            sample,
        }]
    }

    #[test]
    fn schema_description_names_sheets_columns_and_samples() {
        let description = describe_schema(&sales_schema());
        assert!(description.contains("Sheet: \"Sales\""));
        assert!(description.contains("Columns: Region, Amount"));
        assert!(description.contains("\"Region\":\"East\""));
    }

    #[test]
    fn plan_is_extracted_from_a_chatty_reply() {
        let reply = r#"Here is the plan you asked for:
```json
{"sheetName": "Sales", "reasoning": "sum east", "aggregation": {"type": "sum", "column": "Amount"}}
```
Let me know if you need anything else."#;

        let plan = parse_plan(reply).unwrap();
        assert_eq!(plan.sheet_name, "Sales");
        assert_eq!(
            plan.aggregation.as_ref().map(|a| a.kind),
            Some(AggregationType::Sum)
        );
    }

    #[test]
    fn reply_without_json_is_a_generator_failure() {
        let err = parse_plan("I cannot answer that.").unwrap_err();
        assert!(matches!(err, AppError::Generator(_)));
    }

    #[test]
    fn malformed_json_is_a_generator_failure() {
        let err = parse_plan(r#"{"sheetName": }"#).unwrap_err();
        assert!(matches!(err, AppError::Generator(_)));
    }

    #[test]
    fn summary_prompt_carries_question_result_and_reasoning() {
        let plan = AnalysisPlan {
            sheet_name: "Sales".to_string(),
            filters: Vec::new(),
            aggregation: None,
            limit: None,
            reasoning: "sum the east region".to_string(),
        };
        let result = AnalysisResult {
            answer: Answer::Number(130.0),
            meta: ResultMeta {
                record_count: 2,
                generated_plan: plan,
            },
        };

        let prompt = summary_prompt("How much did East sell?", &result);
        assert!(prompt.contains("How much did East sell?"));
        assert!(prompt.contains("sum the east region"));
        assert!(prompt.contains("Records Scanned: 2"));
        assert!(prompt.contains("130"));
    }
}

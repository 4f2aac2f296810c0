use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::schedule::{AdvisorAction, AdvisorReply, ConflictLists, SlotDto};
use crate::services::busy::{self, BusyInterval};
use crate::services::schedule_utils::{self, LocalZone};

/// Everything the advisor sees about a blocked placement.
#[derive(Debug, Clone)]
pub struct AdvisorContext {
    pub capture_id: String,
    pub capture_content: String,
    pub estimated_minutes: i64,
    pub priority: f64,
    pub preferred: SlotDto,
    pub conflicts: ConflictLists,
    pub suggestion: Option<SlotDto>,
    pub timezone: String,
    /// Compact textual description of the busy day, for the prompt.
    pub busy_summary: Vec<String>,
}

#[async_trait]
pub trait ConflictAdvisor: Send + Sync {
    async fn advise(&self, context: &AdvisorContext) -> ScheduleResult<AdvisorReply>;
}

/// Chat-completions client for conflict advice. The reply contract is JSON
/// `{action, message, slot?}`; anything else is an invalid response.
pub struct LlmAdvisor {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl LlmAdvisor {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: StdDuration,
    ) -> ScheduleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ScheduleError::internal(format!("构建 HTTP 客户端失败: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn system_prompt() -> &'static str {
        r#"你是 diaGuru 的日程冲突顾问。用户的首选时间段与现有日程冲突，请根据给出的上下文提出一个可执行的建议。
始终返回合法的 UTF-8 JSON，不要使用 markdown 代码块包裹。结构为:
{
  "action": "suggest_slot" | "ask_overlap" | "defer",
  "message": string,
  "slot": {"start": string, "end": string} | null
}
时间一律使用 ISO-8601 UTC。message 用一两句话向用户解释建议。"#
    }

    fn build_payload(context: &AdvisorContext) -> JsonValue {
        json!({
            "target": {
                "captureId": context.capture_id,
                "content": context.capture_content,
                "estimatedMinutes": context.estimated_minutes,
                "priority": context.priority,
            },
            "preferred": context.preferred,
            "conflicts": context.conflicts,
            "suggestion": context.suggestion,
            "timezone": context.timezone,
            "busySummary": context.busy_summary,
        })
    }

    fn parse_reply(content: &str) -> ScheduleResult<AdvisorReply> {
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str::<AdvisorReply>(trimmed).map_err(|err| {
            ScheduleError::upstream(format!("顾问返回的 JSON 无法解析: {err}"))
        })
    }
}

#[async_trait]
impl ConflictAdvisor for LlmAdvisor {
    async fn advise(&self, context: &AdvisorContext) -> ScheduleResult<AdvisorReply> {
        let correlation_id = Uuid::new_v4().to_string();
        let request_body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": Self::system_prompt() },
                { "role": "user", "content": Self::build_payload(context).to_string() }
            ],
            "temperature": 0.3,
            "max_tokens": 600
        });

        debug!(
            target: "scheduler::advisor",
            correlation_id = %correlation_id,
            capture_id = %context.capture_id,
            "invoking conflict advisor"
        );

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    target: "scheduler::advisor",
                    correlation_id = %correlation_id,
                    "advisor request failed"
                );
                ScheduleError::upstream(format!("顾问请求失败: {err}"))
            })?;

        let status = response.status();
        let latency_ms = start.elapsed().as_millis();
        if !status.is_success() {
            warn!(
                target: "scheduler::advisor",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                latency_ms,
                "advisor returned non-success status"
            );
            return Err(ScheduleError::upstream(format!(
                "顾问服务返回状态码 {}",
                status.as_u16()
            )));
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|err| ScheduleError::upstream(format!("解析顾问响应失败: {err}")))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ScheduleError::upstream("顾问响应中缺少消息内容"))?;

        debug!(
            target: "scheduler::advisor",
            correlation_id = %correlation_id,
            latency_ms,
            "conflict advisor replied"
        );

        Self::parse_reply(content)
    }
}

/// Drop an advisor-proposed slot that is malformed, outside working hours
/// or already busy; the rest of the reply is still usable.
pub fn sanitize_reply(
    mut reply: AdvisorReply,
    busy_intervals: &[BusyInterval],
    zone: &LocalZone,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> AdvisorReply {
    let Some(slot) = reply.slot.take() else {
        return reply;
    };

    let validated = (|| -> ScheduleResult<Option<SlotDto>> {
        let start = schedule_utils::parse_datetime(&slot.start)?;
        let end = schedule_utils::parse_datetime(&slot.end)?;
        if end <= start || start < now {
            return Ok(None);
        }
        if schedule_utils::is_before_working_start(zone, start, config.working_start_hour)
            || schedule_utils::is_after_working_end(zone, end, config.day_end_hour)
        {
            return Ok(None);
        }
        if !busy::is_slot_free(start, end, busy_intervals) {
            return Ok(None);
        }
        Ok(Some(slot))
    })();

    match validated {
        Ok(slot) => reply.slot = slot,
        Err(_) => {
            warn!(target: "scheduler::advisor", "advisor slot failed validation, dropping it");
            reply.slot = None;
        }
    }

    if reply.slot.is_none() && reply.action == AdvisorAction::SuggestSlot {
        reply.action = AdvisorAction::Defer;
    }
    reply
}

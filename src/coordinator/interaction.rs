//! Permission and question flows
//!
//! Requests are presented with reply options whose callback payloads are
//! `<short_key>|<action>`. Actions: `once`, `always`, `reject` for
//! permissions; `o<N>`, `submit`, `custom`, `dismiss` for questions.

use super::SessionCoordinator;
use crate::error::{BridgeError, Result};
use crate::format::escape_html;
use crate::state::{ConversationEntry, InteractionKind, InteractionState};
use crate::types::{Event, EventPayload, InteractionAnswer, PermissionReply, Question, ReplyOption};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Decoded callback payload of a reply option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackData {
    pub short_key: String,
    pub action: String,
}

impl CallbackData {
    pub fn new(short_key: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            short_key: short_key.into(),
            action: action.into(),
        }
    }

    /// Encode, rejecting payloads over `max_bytes`
    pub fn encode(&self, max_bytes: usize) -> Result<String> {
        let data = format!("{}|{}", self.short_key, self.action);
        if data.len() > max_bytes {
            return Err(BridgeError::Config(format!(
                "callback payload '{}' exceeds {} bytes",
                data, max_bytes
            )));
        }
        Ok(data)
    }

    pub fn parse(data: &str) -> Option<Self> {
        let (short_key, action) = data.split_once('|')?;
        if short_key.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self::new(short_key, action))
    }
}

/// Result of handling a reply option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The request is unknown or expired
    Expired,
    /// The prompt changed (toggle or next question)
    Updated,
    /// The next text input will be taken as the answer
    AwaitingText,
    /// The answer was sent to the agent
    Resolved,
}

impl CallbackOutcome {
    /// Short acknowledgement to show the user, if any
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            CallbackOutcome::Expired => Some("This request has expired."),
            CallbackOutcome::AwaitingText => Some("Type your answer as a message."),
            CallbackOutcome::Resolved => Some("Answer sent."),
            CallbackOutcome::Updated => None,
        }
    }
}

fn permission_text(permission: &str, patterns: &[String]) -> String {
    let mut text = format!("🔐 <b>Permission requested</b>\n{}", escape_html(permission));
    for pattern in patterns {
        text.push_str(&format!("\n<code>{}</code>", escape_html(pattern)));
    }
    text
}

fn reply_label(reply: PermissionReply) -> &'static str {
    match reply {
        PermissionReply::Once => "✅ Allowed once",
        PermissionReply::Always => "✅ Always allowed",
        PermissionReply::Reject => "❌ Rejected",
    }
}

fn question_summary(questions: &[Question], answers: &[Vec<String>]) -> String {
    questions
        .iter()
        .zip(answers)
        .map(|(q, a)| {
            format!(
                "❓ {}\n→ <b>{}</b>",
                escape_html(&q.question),
                escape_html(&a.join(", "))
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl SessionCoordinator {
    fn option(&self, short_key: &str, label: impl Into<String>, action: &str) -> Result<ReplyOption> {
        let data = CallbackData::new(short_key, action).encode(self.config.max_callback_bytes)?;
        Ok(ReplyOption::new(label, data))
    }

    fn question_prompt(
        &self,
        short_key: &str,
        questions: &[Question],
        current: usize,
        selected: &[usize],
    ) -> Result<(String, Vec<ReplyOption>)> {
        let question = questions
            .get(current)
            .ok_or_else(|| BridgeError::NotFound(format!("question {}", current)))?;

        let mut text = String::from("❓ ");
        if !question.header.is_empty() {
            text.push_str(&format!("<b>{}</b>\n", escape_html(&question.header)));
        }
        text.push_str(&escape_html(&question.question));
        for option in &question.options {
            if let Some(description) = &option.description {
                text.push_str(&format!(
                    "\n• <b>{}</b>: {}",
                    escape_html(&option.label),
                    escape_html(description)
                ));
            }
        }
        if questions.len() > 1 {
            text.push_str(&format!("\n<i>({}/{})</i>", current + 1, questions.len()));
        }

        let mut options = Vec::with_capacity(question.options.len() + 3);
        for (idx, option) in question.options.iter().enumerate() {
            let label = if question.multiple && selected.contains(&idx) {
                format!("✅ {}", option.label)
            } else {
                option.label.clone()
            };
            options.push(self.option(short_key, label, &format!("o{}", idx))?);
        }
        if question.multiple {
            options.push(self.option(short_key, "Submit", "submit")?);
        }
        if question.custom {
            options.push(self.option(short_key, "✏️ Type answer", "custom")?);
        }
        options.push(self.option(short_key, "Dismiss", "dismiss")?);

        Ok((text, options))
    }

    pub(super) async fn present_permission(&self, conversation_id: &str, event: &Event) -> Result<()> {
        let EventPayload::PermissionRequested(request) = &event.payload else {
            return Ok(());
        };
        let short_key = self.registry.register(&request.request_id, "p", "0").await?;
        if self.store.has_interaction(&short_key) {
            tracing::debug!(conversation_id, short_key = %short_key, "Permission already presented");
            return Ok(());
        }

        let options = vec![
            self.option(&short_key, "Allow once", PermissionReply::Once.as_str())?,
            self.option(&short_key, "Always allow", PermissionReply::Always.as_str())?,
            self.option(&short_key, "Reject", PermissionReply::Reject.as_str())?,
        ];
        let text = permission_text(&request.permission, &request.patterns);
        let message_id = self
            .presenter
            .send_message_with_options(conversation_id, &text, &options)
            .await?;

        self.store.insert_interaction(
            &short_key,
            InteractionState {
                request_id: request.request_id.clone(),
                conversation_id: conversation_id.to_string(),
                message_id: Some(message_id),
                kind: InteractionKind::Permission {
                    permission: request.permission.clone(),
                    patterns: request.patterns.clone(),
                },
            },
        );
        tracing::info!(conversation_id, short_key = %short_key, "Permission requested");
        Ok(())
    }

    pub(super) async fn present_question(&self, conversation_id: &str, event: &Event) -> Result<()> {
        let EventPayload::QuestionRequested(request) = &event.payload else {
            return Ok(());
        };
        if request.questions.is_empty() {
            tracing::debug!(conversation_id, "Question request without questions");
            return Ok(());
        }
        let short_key = self.registry.register(&request.request_id, "q", "0").await?;
        if self.store.has_interaction(&short_key) {
            tracing::debug!(conversation_id, short_key = %short_key, "Question already presented");
            return Ok(());
        }

        let (text, options) = self.question_prompt(&short_key, &request.questions, 0, &[])?;
        let message_id = self
            .presenter
            .send_message_with_options(conversation_id, &text, &options)
            .await?;

        self.store.insert_interaction(
            &short_key,
            InteractionState {
                request_id: request.request_id.clone(),
                conversation_id: conversation_id.to_string(),
                message_id: Some(message_id),
                kind: InteractionKind::Question {
                    questions: request.questions.clone(),
                    current: 0,
                    selected: Vec::new(),
                    answers: Vec::new(),
                },
            },
        );
        tracing::info!(
            conversation_id,
            short_key = %short_key,
            questions = request.questions.len(),
            "Question asked"
        );
        Ok(())
    }

    /// Handle a raw callback payload (`<short_key>|<action>`)
    pub async fn handle_callback(&self, data: &str) -> Result<CallbackOutcome> {
        match CallbackData::parse(data) {
            Some(callback) => {
                self.handle_interaction_callback(&callback.short_key, &callback.action)
                    .await
            }
            None => Ok(CallbackOutcome::Expired),
        }
    }

    /// Handle a reply option chosen by the user
    pub async fn handle_interaction_callback(
        &self,
        short_key: &str,
        action: &str,
    ) -> Result<CallbackOutcome> {
        let Some(request_id) = self.registry.lookup(short_key).await else {
            self.store.remove_interaction(short_key);
            tracing::debug!(short_key, "Callback for expired handle");
            return Ok(CallbackOutcome::Expired);
        };
        let Some(state) = self
            .store
            .interaction(short_key)
            .filter(|s| s.request_id == request_id)
        else {
            return Ok(CallbackOutcome::Expired);
        };

        if let InteractionKind::Permission { permission, patterns } = &state.kind {
            let reply = PermissionReply::parse(action).ok_or_else(|| {
                BridgeError::NotFound(format!("permission action '{}'", action))
            })?;
            let summary = format!(
                "{}\n\n<b>{}</b>",
                permission_text(permission, patterns),
                reply_label(reply)
            );
            return self
                .resolve(short_key, &state, InteractionAnswer::Permission { reply }, &summary)
                .await;
        }
        self.question_action(short_key, state, action).await
    }

    async fn question_action(
        &self,
        short_key: &str,
        state: InteractionState,
        action: &str,
    ) -> Result<CallbackOutcome> {
        let InteractionKind::Question {
            questions,
            current,
            mut selected,
            mut answers,
        } = state.kind.clone()
        else {
            return Ok(CallbackOutcome::Expired);
        };
        let Some(question) = questions.get(current) else {
            return Ok(CallbackOutcome::Expired);
        };

        match action {
            "dismiss" => {
                return self
                    .resolve(
                        short_key,
                        &state,
                        InteractionAnswer::Dismiss,
                        &format!("❓ {}\n→ <i>dismissed</i>", escape_html(&question.question)),
                    )
                    .await;
            }
            "custom" => {
                if !question.custom {
                    return Err(BridgeError::NotFound(
                        "question does not accept typed answers".to_string(),
                    ));
                }
                let mut conversations = self.store.lock().await;
                conversations
                    .entry(state.conversation_id.clone())
                    .or_insert_with(|| ConversationEntry::new(&state.conversation_id))
                    .awaiting_custom = Some(short_key.to_string());
                return Ok(CallbackOutcome::AwaitingText);
            }
            "submit" => {
                if !question.multiple {
                    return Err(BridgeError::NotFound(
                        "submit on a single-choice question".to_string(),
                    ));
                }
                selected.sort_unstable();
                let labels = selected
                    .iter()
                    .filter_map(|&idx| question.options.get(idx))
                    .map(|o| o.label.clone())
                    .collect();
                answers.push(labels);
            }
            _ => {
                let idx = action
                    .strip_prefix('o')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&idx| idx < question.options.len())
                    .ok_or_else(|| BridgeError::NotFound(format!("question action '{}'", action)))?;

                if question.multiple {
                    match selected.iter().position(|&s| s == idx) {
                        Some(pos) => {
                            selected.remove(pos);
                        }
                        None => selected.push(idx),
                    }
                    let updated = InteractionState {
                        kind: InteractionKind::Question {
                            questions: questions.clone(),
                            current,
                            selected: selected.clone(),
                            answers,
                        },
                        ..state
                    };
                    self.show_question(short_key, &updated, &questions, current, &selected)
                        .await?;
                    self.store.insert_interaction(short_key, updated);
                    return Ok(CallbackOutcome::Updated);
                }
                answers.push(vec![question.options[idx].label.clone()]);
            }
        }

        self.advance(short_key, state, questions, answers).await
    }

    /// Take a typed message as the answer to the current question
    pub(super) async fn answer_custom(&self, short_key: &str, text: &str) -> Result<CallbackOutcome> {
        let Some(request_id) = self.registry.lookup(short_key).await else {
            self.store.remove_interaction(short_key);
            tracing::debug!(short_key, "Typed answer for expired handle");
            return Ok(CallbackOutcome::Expired);
        };
        let Some(state) = self
            .store
            .interaction(short_key)
            .filter(|s| s.request_id == request_id)
        else {
            return Ok(CallbackOutcome::Expired);
        };
        let InteractionKind::Question {
            questions,
            mut answers,
            ..
        } = state.kind.clone()
        else {
            return Ok(CallbackOutcome::Expired);
        };
        answers.push(vec![text.to_string()]);
        self.advance(short_key, state, questions, answers).await
    }

    /// Show the next question, or send the answers once all are in
    async fn advance(
        &self,
        short_key: &str,
        state: InteractionState,
        questions: Vec<Question>,
        answers: Vec<Vec<String>>,
    ) -> Result<CallbackOutcome> {
        if answers.len() >= questions.len() {
            let summary = question_summary(&questions, &answers);
            return self
                .resolve(short_key, &state, InteractionAnswer::Question { answers }, &summary)
                .await;
        }

        let current = answers.len();
        let updated = InteractionState {
            kind: InteractionKind::Question {
                questions: questions.clone(),
                current,
                selected: Vec::new(),
                answers,
            },
            ..state
        };
        self.show_question(short_key, &updated, &questions, current, &[])
            .await?;
        self.store.insert_interaction(short_key, updated);
        Ok(CallbackOutcome::Updated)
    }

    async fn show_question(
        &self,
        short_key: &str,
        state: &InteractionState,
        questions: &[Question],
        current: usize,
        selected: &[usize],
    ) -> Result<()> {
        let (text, options) = self.question_prompt(short_key, questions, current, selected)?;
        match &state.message_id {
            Some(message_id) => {
                match self
                    .presenter
                    .edit_message_with_options(&state.conversation_id, message_id, &text, &options)
                    .await
                {
                    Err(e) if e.is_not_modified() => Ok(()),
                    other => other,
                }
            }
            None => self
                .presenter
                .send_message_with_options(&state.conversation_id, &text, &options)
                .await
                .map(|_| ()),
        }
    }

    /// Drop expired handles and the prompts behind them
    pub async fn sweep_expired(&self) -> usize {
        let expired = self.registry.sweep().await;
        if expired.is_empty() {
            return 0;
        }
        let dropped = self.store.forget_interactions(&expired).await;
        if dropped > 0 {
            tracing::info!(dropped, "Expired prompts dropped");
        }
        dropped
    }

    /// Sweep expired handles on a fixed interval until cancelled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.sweep_expired().await;
                    }
                }
            }
        })
    }

    /// Send the answer, then retire the prompt and its handle
    async fn resolve(
        &self,
        short_key: &str,
        state: &InteractionState,
        answer: InteractionAnswer,
        summary: &str,
    ) -> Result<CallbackOutcome> {
        self.agent
            .reply_to_interaction(&state.request_id, &answer)
            .await?;

        self.store.remove_interaction(short_key);
        self.registry.consume(short_key).await;
        if let Some(entry) = self.store.lock().await.get_mut(&state.conversation_id) {
            if entry.awaiting_custom.as_deref() == Some(short_key) {
                entry.awaiting_custom = None;
            }
        }

        if let Some(message_id) = &state.message_id {
            if let Err(e) = self
                .presenter
                .edit_message_with_options(&state.conversation_id, message_id, summary, &[])
                .await
            {
                if !e.is_not_modified() {
                    tracing::warn!(
                        conversation_id = %state.conversation_id,
                        error = %e,
                        "Failed to update resolved prompt"
                    );
                }
            }
        }

        tracing::info!(
            conversation_id = %state.conversation_id,
            short_key,
            "Interaction resolved"
        );
        Ok(CallbackOutcome::Resolved)
    }
}

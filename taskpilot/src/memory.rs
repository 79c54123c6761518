//! Short- and long-term memory for agents.
//!
//! Working memory is a bounded window of recent observations; the long-term
//! side archives observation batches, finished task records, and
//! conversation messages, and supports similar-task lookup plus pattern
//! extraction over past successes. Delegation shares memory by value:
//! [`MemoryStore::snapshot`] produces a plain-data copy that a child agent
//! imports, so no live references cross agent boundaries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::llm::Message;
use crate::util::now_unix_seconds;

/// A batch of observations archived during replanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedObservations {
    /// Goal of the task the observations came from.
    pub task: String,
    /// Plan cursor at archive time.
    pub step: usize,
    /// The observation texts.
    pub observations: Vec<String>,
    /// Archive time, unix seconds.
    pub archived_at: f64,
}

/// Record of a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The goal text.
    pub goal: String,
    /// Strategy of the final plan.
    pub strategy: String,
    /// Whether the task completed.
    pub success: bool,
    /// Steps in the final plan.
    pub step_count: usize,
    /// Tools the plan used.
    pub tools_used: Vec<String>,
    /// Completion time, unix seconds.
    pub finished_at: f64,
}

/// Plain-data copy of a memory store, used to seed another agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Finished task records.
    pub task_records: Vec<TaskRecord>,
    /// Archived observation batches.
    pub archives: Vec<ArchivedObservations>,
}

/// Per-agent memory: bounded working set plus an append-mostly archive.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Vec<Message>,
    task_records: Vec<TaskRecord>,
    archives: Vec<ArchivedObservations>,
    checkpoints: Vec<Value>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a conversation message.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Recent conversation messages, oldest first.
    #[must_use]
    pub fn recent_messages(&self, count: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(count);
        self.messages[start..].to_vec()
    }

    /// Archive a batch of observations cleared from the working set.
    pub fn archive_observations(&mut self, task: &str, step: usize, observations: &[String]) {
        if observations.is_empty() {
            return;
        }
        debug!(task, count = observations.len(), "archiving observations");
        self.archives.push(ArchivedObservations {
            task: task.to_owned(),
            step,
            observations: observations.to_vec(),
            archived_at: now_unix_seconds(),
        });
    }

    /// Record a finished task for future similar-task lookup.
    pub fn record_task(&mut self, record: TaskRecord) {
        self.task_records.push(record);
    }

    /// Record a successful task from its final plan.
    pub fn learn_from_success(&mut self, goal: &str, plan: &crate::plan::Plan) {
        let tools_used: Vec<String> = plan
            .steps
            .iter()
            .filter_map(|s| s.tool_name.clone())
            .collect();
        self.record_task(TaskRecord {
            goal: goal.to_owned(),
            strategy: plan.strategy.as_str().to_owned(),
            success: true,
            step_count: plan.steps.len(),
            tools_used,
            finished_at: now_unix_seconds(),
        });
    }

    /// Past tasks similar to a goal, best match first.
    ///
    /// Scoring is word overlap between the query and recorded goals; tasks
    /// with no overlapping words are excluded.
    #[must_use]
    pub fn find_similar_tasks(&self, goal: &str, max_results: usize) -> Vec<&TaskRecord> {
        let query_words: Vec<String> = goal
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        let mut scored: Vec<(usize, &TaskRecord)> = self
            .task_records
            .iter()
            .filter_map(|record| {
                let recorded = record.goal.to_lowercase();
                let score = query_words
                    .iter()
                    .filter(|word| recorded.contains(word.as_str()))
                    .count();
                (score > 0).then_some((score, record))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(max_results)
            .map(|(_, record)| record)
            .collect()
    }

    /// Frequent patterns across successful tasks.
    ///
    /// Reports the most used strategies and tools, most frequent first.
    #[must_use]
    pub fn common_patterns(&self) -> Vec<String> {
        let mut strategy_counts: HashMap<&str, usize> = HashMap::new();
        let mut tool_counts: HashMap<&str, usize> = HashMap::new();

        for record in self.task_records.iter().filter(|r| r.success) {
            *strategy_counts.entry(record.strategy.as_str()).or_default() += 1;
            for tool in &record.tools_used {
                *tool_counts.entry(tool.as_str()).or_default() += 1;
            }
        }

        let mut patterns = Vec::new();
        let mut strategies: Vec<(&str, usize)> = strategy_counts.into_iter().collect();
        strategies.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        for (strategy, count) in strategies.into_iter().take(3) {
            patterns.push(format!("strategy '{strategy}' succeeded {count} time(s)"));
        }

        let mut tools: Vec<(&str, usize)> = tool_counts.into_iter().collect();
        tools.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        for (tool, count) in tools.into_iter().take(3) {
            patterns.push(format!("tool '{tool}' used in {count} successful task(s)"));
        }

        patterns
    }

    /// Keep the latest checkpoint payloads (best-effort history).
    pub fn save_checkpoint(&mut self, checkpoint: Value) {
        self.checkpoints.push(checkpoint);
        if self.checkpoints.len() > 20 {
            let drop = self.checkpoints.len() - 20;
            self.checkpoints.drain(..drop);
        }
    }

    /// The most recent checkpoint payload, if any.
    #[must_use]
    pub fn last_checkpoint(&self) -> Option<&Value> {
        self.checkpoints.last()
    }

    /// Number of recorded tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.task_records.len()
    }

    /// Number of successful recorded tasks.
    #[must_use]
    pub fn successful_task_count(&self) -> usize {
        self.task_records.iter().filter(|r| r.success).count()
    }

    /// Plain-data copy for seeding another agent's memory.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            messages: self.messages.clone(),
            task_records: self.task_records.clone(),
            archives: self.archives.clone(),
        }
    }

    /// Merge a snapshot produced by [`snapshot`](Self::snapshot).
    pub fn import(&mut self, snapshot: MemorySnapshot) {
        self.messages.extend(snapshot.messages);
        self.task_records.extend(snapshot.task_records);
        self.archives.extend(snapshot.archives);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, PlanStep, PlanStrategy};

    fn record(goal: &str, success: bool, strategy: &str, tools: &[&str]) -> TaskRecord {
        TaskRecord {
            goal: goal.to_owned(),
            strategy: strategy.to_owned(),
            success,
            step_count: 2,
            tools_used: tools.iter().map(|t| (*t).to_owned()).collect(),
            finished_at: 0.0,
        }
    }

    #[test]
    fn similar_tasks_ranked_by_overlap() {
        let mut memory = MemoryStore::new();
        memory.record_task(record("write a report file", true, "step_by_step", &[]));
        memory.record_task(record("delete old logs", true, "step_by_step", &[]));
        memory.record_task(record("write and format a file summary", true, "research", &[]));

        let similar = memory.find_similar_tasks("write the summary file", 5);
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].goal, "write and format a file summary");
    }

    #[test]
    fn no_overlap_means_no_results() {
        let mut memory = MemoryStore::new();
        memory.record_task(record("delete old logs", true, "step_by_step", &[]));
        assert!(memory.find_similar_tasks("unrelated query", 5).is_empty());
    }

    #[test]
    fn patterns_cover_strategies_and_tools() {
        let mut memory = MemoryStore::new();
        memory.record_task(record("a", true, "step_by_step", &["write_file"]));
        memory.record_task(record("b", true, "step_by_step", &["write_file", "read_file"]));
        memory.record_task(record("c", false, "debugging", &["web_search"]));

        let patterns = memory.common_patterns();
        assert!(patterns.iter().any(|p| p.contains("step_by_step")));
        assert!(patterns.iter().any(|p| p.contains("write_file")));
        // Failed tasks contribute nothing.
        assert!(!patterns.iter().any(|p| p.contains("web_search")));
    }

    #[test]
    fn learn_from_success_captures_tools() {
        let mut memory = MemoryStore::new();
        let plan = Plan::new(
            "goal",
            vec![PlanStep::tool_call(
                "s1",
                "write",
                "write_file",
                serde_json::json!({}),
            )],
            PlanStrategy::StepByStep,
        );
        memory.learn_from_success("goal", &plan);
        assert_eq!(memory.successful_task_count(), 1);
        assert_eq!(memory.task_records[0].tools_used, vec!["write_file"]);
    }

    #[test]
    fn snapshot_import_round_trip() {
        let mut parent = MemoryStore::new();
        parent.add_message(Message::system("seed"));
        parent.record_task(record("past task", true, "step_by_step", &[]));

        let mut child = MemoryStore::new();
        child.import(parent.snapshot());

        assert_eq!(child.recent_messages(10).len(), 1);
        assert_eq!(child.task_count(), 1);
        // Mutating the child leaves the parent untouched.
        child.add_message(Message::user("child only"));
        assert_eq!(parent.recent_messages(10).len(), 1);
    }
}

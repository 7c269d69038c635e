//! # Approval Gate
//!
//! Decides whether an action runs: auto-approve, auto-reject, or ask the confirmation port.
//!
//! | Policy    | Command                     | File edit    | Remote tool call |
//! |-----------|-----------------------------|--------------|------------------|
//! | suggest   | ask                         | ask          | ask              |
//! | auto-edit | ask                         | auto-approve | ask              |
//! | full-auto | auto-approve, run sandboxed | auto-approve | auto-approve     |

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::command_rules::{CommandRules, CommandVerdict};
use crate::domain::exec::SandboxMode;
use crate::domain::traits::ConfirmationPort;
use crate::domain::types::{ActionKind, ApprovalPolicy, ApprovalRequest, ReviewDecision};
use crate::strings::messages;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved { sandbox: SandboxMode },
    /// Carries the message placed in the tool result.
    Rejected(String),
    /// Rejected, and the user asked to stop the run.
    Abort,
    /// The token fired while waiting for a decision.
    Interrupted,
}

pub struct ApprovalGate {
    policy: ApprovalPolicy,
    rules: CommandRules,
    confirm: Arc<dyn ConfirmationPort>,
    session_approved: Mutex<HashSet<Vec<String>>>,
    // Serializes prompts so concurrent calls never ask at the same time
    prompt_lock: Mutex<()>,
}

impl ApprovalGate {
    pub fn new(
        policy: ApprovalPolicy,
        rules: CommandRules,
        confirm: Arc<dyn ConfirmationPort>,
    ) -> Self {
        Self {
            policy,
            rules,
            confirm,
            session_approved: Mutex::new(HashSet::new()),
            prompt_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    pub async fn check(&self, request: &ApprovalRequest, token: &CancellationToken) -> GateDecision {
        let decision = match &request.action {
            ActionKind::Command { command } => {
                match self.rules.check(command) {
                    CommandVerdict::Blocked(message) => GateDecision::Rejected(message),
                    _ if self.policy == ApprovalPolicy::FullAuto => GateDecision::Approved {
                        sandbox: SandboxMode::Platform,
                    },
                    CommandVerdict::Allowed => GateDecision::Approved {
                        sandbox: SandboxMode::None,
                    },
                    CommandVerdict::Unlisted => self.ask(request, token).await,
                }
            }
            ActionKind::FileEdit { .. } => match self.policy {
                ApprovalPolicy::AutoEdit | ApprovalPolicy::FullAuto => GateDecision::Approved {
                    sandbox: SandboxMode::None,
                },
                ApprovalPolicy::Suggest => self.ask(request, token).await,
            },
            ActionKind::RemoteToolCall { .. } => match self.policy {
                ApprovalPolicy::FullAuto => GateDecision::Approved {
                    sandbox: SandboxMode::None,
                },
                _ => self.ask(request, token).await,
            },
        };

        tracing::debug!(
            call_id = %request.call_id,
            policy = %self.policy,
            decision = ?decision,
            "approval decided"
        );
        decision
    }

    async fn ask(&self, request: &ApprovalRequest, token: &CancellationToken) -> GateDecision {
        if self.is_session_approved(request).await {
            return GateDecision::Approved {
                sandbox: SandboxMode::None,
            };
        }

        let _prompt = tokio::select! {
            biased;
            _ = token.cancelled() => return GateDecision::Interrupted,
            guard = self.prompt_lock.lock() => guard,
        };
        if token.is_cancelled() {
            return GateDecision::Interrupted;
        }
        // Another call may have approved the same command for the session while we waited
        if self.is_session_approved(request).await {
            return GateDecision::Approved {
                sandbox: SandboxMode::None,
            };
        }

        let decision = tokio::select! {
            biased;
            _ = token.cancelled() => return GateDecision::Interrupted,
            decision = self.confirm.confirm(request) => decision,
        };
        tracing::info!(call_id = %request.call_id, decision = ?decision, "user reviewed action");

        match decision {
            ReviewDecision::Approve => GateDecision::Approved {
                sandbox: SandboxMode::None,
            },
            ReviewDecision::ApproveForSession => {
                if let ActionKind::Command { command } = &request.action {
                    self.session_approved.lock().await.insert(command.clone());
                }
                GateDecision::Approved {
                    sandbox: SandboxMode::None,
                }
            }
            ReviewDecision::Reject => GateDecision::Rejected(messages::NOT_CONFIRMED.to_string()),
            ReviewDecision::Abort => GateDecision::Abort,
        }
    }

    async fn is_session_approved(&self, request: &ApprovalRequest) -> bool {
        match &request.action {
            ActionKind::Command { command } => {
                self.session_approved.lock().await.contains(command)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::ScriptedConfirm;
    use crate::domain::config::CommandsConfig;

    fn command(parts: &[&str]) -> ApprovalRequest {
        let command: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        ApprovalRequest {
            call_id: "call-1".into(),
            description: command.join(" "),
            action: ActionKind::Command { command },
        }
    }

    fn edit() -> ApprovalRequest {
        ApprovalRequest {
            call_id: "call-2".into(),
            description: "edit".into(),
            action: ActionKind::FileEdit {
                patch: "*** Begin Patch\n*** End Patch".into(),
            },
        }
    }

    fn remote() -> ApprovalRequest {
        ApprovalRequest {
            call_id: "call-3".into(),
            description: "remote".into(),
            action: ActionKind::RemoteToolCall {
                server: "Calc".into(),
                tool: "add".into(),
            },
        }
    }

    fn gate(policy: ApprovalPolicy, confirm: &Arc<ScriptedConfirm>) -> ApprovalGate {
        ApprovalGate::new(policy, CommandRules::default(), confirm.clone())
    }

    #[tokio::test]
    async fn test_policy_table() {
        let token = CancellationToken::new();
        let approved = GateDecision::Approved {
            sandbox: SandboxMode::None,
        };

        let confirm = Arc::new(ScriptedConfirm::always(ReviewDecision::Approve));
        let suggest = gate(ApprovalPolicy::Suggest, &confirm);
        assert_eq!(suggest.check(&command(&["ls"]), &token).await, approved);
        assert_eq!(suggest.check(&edit(), &token).await, approved);
        assert_eq!(suggest.check(&remote(), &token).await, approved);
        assert_eq!(confirm.requests().len(), 3);

        let confirm = Arc::new(ScriptedConfirm::always(ReviewDecision::Approve));
        let auto_edit = gate(ApprovalPolicy::AutoEdit, &confirm);
        assert_eq!(auto_edit.check(&edit(), &token).await, approved);
        assert!(confirm.requests().is_empty());
        assert_eq!(auto_edit.check(&command(&["ls"]), &token).await, approved);
        assert_eq!(auto_edit.check(&remote(), &token).await, approved);
        assert_eq!(confirm.requests().len(), 2);

        let confirm = Arc::new(ScriptedConfirm::always(ReviewDecision::Reject));
        let full_auto = gate(ApprovalPolicy::FullAuto, &confirm);
        assert_eq!(
            full_auto.check(&command(&["ls"]), &token).await,
            GateDecision::Approved {
                sandbox: SandboxMode::Platform
            }
        );
        assert_eq!(full_auto.check(&edit(), &token).await, approved);
        assert_eq!(full_auto.check(&remote(), &token).await, approved);
        assert!(confirm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_reject_and_abort() {
        let token = CancellationToken::new();
        let confirm = Arc::new(ScriptedConfirm::new(vec![
            ReviewDecision::Reject,
            ReviewDecision::Abort,
        ]));
        let gate = gate(ApprovalPolicy::Suggest, &confirm);

        assert!(matches!(
            gate.check(&command(&["ls"]), &token).await,
            GateDecision::Rejected(msg) if msg.contains("not confirmed")
        ));
        assert_eq!(gate.check(&command(&["ls"]), &token).await, GateDecision::Abort);
    }

    #[tokio::test]
    async fn test_session_approval_skips_later_prompts() {
        let token = CancellationToken::new();
        let confirm = Arc::new(ScriptedConfirm::new(vec![ReviewDecision::ApproveForSession]));
        let gate = gate(ApprovalPolicy::Suggest, &confirm);

        for _ in 0..3 {
            assert!(matches!(
                gate.check(&command(&["cargo", "test"]), &token).await,
                GateDecision::Approved { .. }
            ));
        }
        assert_eq!(confirm.requests().len(), 1);

        // A different command still asks; the script is exhausted so it rejects
        assert!(matches!(
            gate.check(&command(&["cargo", "build"]), &token).await,
            GateDecision::Rejected(_)
        ));
        assert_eq!(confirm.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_command_rules_override_policy() {
        let token = CancellationToken::new();
        let confirm = Arc::new(ScriptedConfirm::always(ReviewDecision::Approve));
        let rules = CommandRules::new(&CommandsConfig {
            allowed: vec!["ls".into()],
            blocked: vec!["rm".into()],
        });

        let full_auto = ApprovalGate::new(ApprovalPolicy::FullAuto, rules.clone(), confirm.clone());
        assert!(matches!(
            full_auto.check(&command(&["rm", "-rf", "x"]), &token).await,
            GateDecision::Rejected(msg) if msg.contains("blocked")
        ));

        let suggest = ApprovalGate::new(ApprovalPolicy::Suggest, rules, confirm.clone());
        assert_eq!(
            suggest.check(&command(&["ls", "-la"]), &token).await,
            GateDecision::Approved {
                sandbox: SandboxMode::None
            }
        );
        assert!(confirm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_prompts_are_serialized() {
        let token = CancellationToken::new();
        let confirm = Arc::new(ScriptedConfirm::always(ReviewDecision::Approve).with_delay(20));
        let gate = gate(ApprovalPolicy::Suggest, &confirm);

        let requests: Vec<ApprovalRequest> = (0..4)
            .map(|i| command(&["echo", &i.to_string()]))
            .collect();
        futures::future::join_all(requests.iter().map(|r| gate.check(r, &token))).await;

        assert_eq!(confirm.requests().len(), 4);
        assert_eq!(confirm.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_prompt() {
        let token = CancellationToken::new();
        let confirm = Arc::new(ScriptedConfirm::always(ReviewDecision::Approve).with_delay(10_000));
        let gate = gate(ApprovalPolicy::Suggest, &confirm);

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert_eq!(
            gate.check(&command(&["ls"]), &token).await,
            GateDecision::Interrupted
        );
    }
}

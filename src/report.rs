//! Run-report e-mail (`-r`, §6, ambient). Summarizes one session's outcome and its recorded
//! `SessionTask` rows, and relays it through a local MTA via `lettre` — the crawler has no SMTP
//! credentials of its own, so this assumes a relay that accepts local mail, the same trust model
//! as a Unix `sendmail`-backed cron job.

use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};

use crate::db::SessionTask;
use crate::error::Error;
use crate::session::SessionOutcome;

/// Render a plain-text summary of a session's outcome and its subprocess tasks.
pub fn render(outcome: &SessionOutcome, tasks: &[SessionTask]) -> String {
    let mut body = format!(
        "session {} {}\nfailed documents: {}\n\n",
        outcome.session_id.get(),
        if outcome.success { "succeeded" } else { "failed" },
        outcome.failed_documents,
    );
    if tasks.is_empty() {
        body.push_str("no subprocess tasks recorded\n");
    } else {
        for task in tasks {
            body.push_str(&format!(
                "{:?}: exit={} {}\n",
                task.phase,
                task.exit_status.map_or("pending".to_string(), |c| c.to_string()),
                task.comment.as_deref().unwrap_or(""),
            ));
        }
    }
    body
}

/// Send the rendered report to `to` via `relay_host`, port 25, with no authentication.
pub fn send(to: &str, relay_host: &str, outcome: &SessionOutcome, tasks: &[SessionTask]) -> Result<(), Error> {
    let subject = format!(
        "crawler session {} {}",
        outcome.session_id.get(),
        if outcome.success { "OK" } else { "FAILED" }
    );

    let message = Message::builder()
        .from("crawler@localhost".parse().map_err(|e| Error::Config(format!("invalid from address: {e}")))?)
        .to(to.parse().map_err(|e| Error::Config(format!("invalid -r address {to}: {e}")))?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(render(outcome, tasks))
        .map_err(|e| Error::Config(format!("could not build run-report message: {e}")))?;

    let mailer = SmtpTransport::builder_dangerous(relay_host).build();
    mailer
        .send(&message)
        .map_err(|e| Error::Other(format!("could not send run report to {to} via {relay_host}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, SessionId};

    #[test]
    fn renders_success_with_no_tasks() {
        let outcome = SessionOutcome { session_id: SessionId::from(1), success: true, failed_documents: 0 };
        let body = render(&outcome, &[]);
        assert!(body.contains("succeeded"));
        assert!(body.contains("no subprocess tasks recorded"));
    }

    #[test]
    fn renders_task_exit_codes() {
        let outcome = SessionOutcome { session_id: SessionId::from(1), success: false, failed_documents: 2 };
        let task = SessionTask {
            id: 1.into(),
            session_id: SessionId::from(1),
            phase: Phase::Upload,
            started_at: 0,
            ended_at: Some(1),
            exit_status: Some(104),
            comment: Some("serialization error".to_string()),
        };
        let body = render(&outcome, std::slice::from_ref(&task));
        assert!(body.contains("failed"));
        assert!(body.contains("exit=104"));
        assert!(body.contains("serialization error"));
    }
}

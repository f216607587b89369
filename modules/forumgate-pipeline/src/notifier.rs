use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use forumgate_common::{DuplicatePostEvent, PipelineError, PipelineResult};

use crate::deadline::with_deadline;
use crate::traits::ThreadDirectory;

/// Body of the notice posted into a duplicate thread.
pub fn duplicate_notice(match_ids: &[String]) -> String {
    let links: Vec<String> = match_ids.iter().map(|id| format!(" * <#{id}>")).collect();
    format!(
        "This forum post seems to be duplicate. Please take a look at the following posts instead:\n{}",
        links.join("\n")
    )
}

/// Points authors of duplicate posts at the earlier threads.
pub struct DuplicateNotifier {
    directory: Arc<dyn ThreadDirectory>,
    call_timeout: Duration,
}

impl DuplicateNotifier {
    pub fn new(directory: Arc<dyn ThreadDirectory>, call_timeout: Duration) -> Self {
        Self {
            directory,
            call_timeout,
        }
    }

    pub async fn notify(&self, event: &DuplicatePostEvent) -> PipelineResult<()> {
        let t = self.call_timeout;
        let mut ids = Vec::with_capacity(event.matches.len());

        for m in &event.matches {
            let thread = with_deadline("thread directory", t, self.directory.thread(&m.id)).await?;
            if thread.is_none() {
                return Err(PipelineError::invariant(format!(
                    "duplicate of {} references unknown thread {}",
                    event.id, m.id
                )));
            }
            ids.push(m.id.clone());
        }

        if ids.is_empty() {
            return Err(PipelineError::invariant(format!(
                "duplicate decision for {} carries no matches",
                event.id
            )));
        }

        with_deadline(
            "thread directory",
            t,
            self.directory.send_message(&event.id, &duplicate_notice(&ids)),
        )
        .await?;

        info!(thread_id = %event.id, matches = ids.len(), "Duplicate notice sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_lists_channel_mentions() {
        let notice = duplicate_notice(&["1".into(), "2".into()]);
        assert!(notice.ends_with("instead:\n * <#1>\n * <#2>"));
    }
}

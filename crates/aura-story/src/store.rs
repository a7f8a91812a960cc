//! Persistence seam (§10). `StoryStore` is the narrow trait every other
//! module depends on; `InMemoryStoryStore` is the default arena+index
//! implementation (§9 design note: Steps persisted separately keyed by
//! `(storyId, stepId)`, Story holds `stepIds` not object references).
//!
//! Guarded by one `tokio::sync::Mutex` per Story so that chat edits and
//! scheduler advances never interleave (§5 "per-Story monitor").

use aura_core::{AuraError, AuraResult, Step, Story, StoryStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A Story plus the per-Story monitor that serializes every mutation
/// against it.
struct StoryEntry {
    story: Story,
    steps: HashMap<String, Step>,
}

#[async_trait::async_trait]
pub trait StoryStore: Send + Sync {
    async fn insert_story(&self, story: Story);
    async fn get_story(&self, story_id: &str) -> AuraResult<Story>;
    async fn list_stories(&self, status: Option<StoryStatus>, repository_path: Option<&str>) -> Vec<Story>;
    async fn delete_story(&self, story_id: &str) -> AuraResult<()>;

    /// Runs `f` with exclusive access to a Story, under its per-Story
    /// monitor, returning whatever `f` returns. This is the only way
    /// callers may mutate a Story — it's how §5's linearizability
    /// guarantee is actually enforced.
    async fn with_story_mut<F, R>(&self, story_id: &str, f: F) -> AuraResult<R>
    where
        F: FnOnce(&mut Story) -> AuraResult<R> + Send,
        R: Send;

    async fn insert_step(&self, step: Step) -> AuraResult<()>;
    async fn get_step(&self, story_id: &str, step_id: &str) -> AuraResult<Step>;
    async fn list_steps(&self, story_id: &str) -> AuraResult<Vec<Step>>;
    async fn delete_step(&self, story_id: &str, step_id: &str) -> AuraResult<()>;
    async fn with_step_mut<F, R>(&self, story_id: &str, step_id: &str, f: F) -> AuraResult<R>
    where
        F: FnOnce(&mut Step) -> AuraResult<R> + Send,
        R: Send;

    /// Mutates every Step of a Story in one critical section, e.g. for
    /// cascade rework where the set of affected Steps is determined from
    /// the current snapshot (§4.4).
    async fn with_all_steps_mut<F>(&self, story_id: &str, f: F) -> AuraResult<()>
    where
        F: FnOnce(&mut HashMap<String, Step>) + Send;
}

#[derive(Default)]
pub struct InMemoryStoryStore {
    entries: Mutex<HashMap<String, Arc<Mutex<StoryEntry>>>>,
}

impl InMemoryStoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, story_id: &str) -> AuraResult<Arc<Mutex<StoryEntry>>> {
        self.entries
            .lock()
            .await
            .get(story_id)
            .cloned()
            .ok_or_else(|| AuraError::not_found(format!("story {story_id}")))
    }
}

#[async_trait::async_trait]
impl StoryStore for InMemoryStoryStore {
    async fn insert_story(&self, story: Story) {
        let entry = StoryEntry {
            story,
            steps: HashMap::new(),
        };
        let id = entry.story.id.clone();
        self.entries.lock().await.insert(id, Arc::new(Mutex::new(entry)));
    }

    async fn get_story(&self, story_id: &str) -> AuraResult<Story> {
        let entry = self.entry(story_id).await?;
        let guard = entry.lock().await;
        Ok(guard.story.clone())
    }

    async fn list_stories(&self, status: Option<StoryStatus>, repository_path: Option<&str>) -> Vec<Story> {
        let entries = self.entries.lock().await;
        let mut out = Vec::new();
        for entry in entries.values() {
            let guard = entry.lock().await;
            if let Some(s) = status {
                if guard.story.status != s {
                    continue;
                }
            }
            if let Some(path) = repository_path {
                if guard.story.repository_path != path {
                    continue;
                }
            }
            out.push(guard.story.clone());
        }
        out
    }

    async fn delete_story(&self, story_id: &str) -> AuraResult<()> {
        self.entries
            .lock()
            .await
            .remove(story_id)
            .map(|_| ())
            .ok_or_else(|| AuraError::not_found(format!("story {story_id}")))
    }

    async fn with_story_mut<F, R>(&self, story_id: &str, f: F) -> AuraResult<R>
    where
        F: FnOnce(&mut Story) -> AuraResult<R> + Send,
        R: Send,
    {
        let entry = self.entry(story_id).await?;
        let mut guard = entry.lock().await;
        let result = f(&mut guard.story)?;
        guard.story.touch();
        Ok(result)
    }

    async fn insert_step(&self, step: Step) -> AuraResult<()> {
        let entry = self.entry(&step.story_id).await?;
        let mut guard = entry.lock().await;
        guard.story.step_ids.push(step.id.clone());
        guard.steps.insert(step.id.clone(), step);
        Ok(())
    }

    async fn get_step(&self, story_id: &str, step_id: &str) -> AuraResult<Step> {
        let entry = self.entry(story_id).await?;
        let guard = entry.lock().await;
        guard
            .steps
            .get(step_id)
            .cloned()
            .ok_or_else(|| AuraError::not_found(format!("step {step_id}")))
    }

    async fn list_steps(&self, story_id: &str) -> AuraResult<Vec<Step>> {
        let entry = self.entry(story_id).await?;
        let guard = entry.lock().await;
        let mut steps: Vec<Step> = guard
            .story
            .step_ids
            .iter()
            .filter_map(|id| guard.steps.get(id).cloned())
            .collect();
        steps.sort_by_key(|s| s.order);
        Ok(steps)
    }

    async fn delete_step(&self, story_id: &str, step_id: &str) -> AuraResult<()> {
        let entry = self.entry(story_id).await?;
        let mut guard = entry.lock().await;
        guard.steps.remove(step_id).ok_or_else(|| AuraError::not_found(format!("step {step_id}")))?;
        guard.story.step_ids.retain(|id| id != step_id);
        Ok(())
    }

    async fn with_step_mut<F, R>(&self, story_id: &str, step_id: &str, f: F) -> AuraResult<R>
    where
        F: FnOnce(&mut Step) -> AuraResult<R> + Send,
        R: Send,
    {
        let entry = self.entry(story_id).await?;
        let mut guard = entry.lock().await;
        let step = guard
            .steps
            .get_mut(step_id)
            .ok_or_else(|| AuraError::not_found(format!("step {step_id}")))?;
        f(step)
    }

    async fn with_all_steps_mut<F>(&self, story_id: &str, f: F) -> AuraResult<()>
    where
        F: FnOnce(&mut HashMap<String, Step>) + Send,
    {
        let entry = self.entry(story_id).await?;
        let mut guard = entry.lock().await;
        f(&mut guard.steps);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_core::{AutomationMode, DispatchTarget};

    fn new_story() -> Story {
        Story::new(
            "Add Fibonacci".into(),
            "desc".into(),
            "/repo".into(),
            AutomationMode::Autonomous,
            DispatchTarget::Internal,
            None,
        )
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = InMemoryStoryStore::new();
        let story = new_story();
        let id = story.id.clone();
        store.insert_story(story).await;
        let fetched = store.get_story(&id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn get_unknown_story_is_not_found() {
        let store = InMemoryStoryStore::new();
        assert!(store.get_story("nope").await.is_err());
    }

    #[tokio::test]
    async fn steps_persist_keyed_by_story_and_order_on_list() {
        let store = InMemoryStoryStore::new();
        let story = new_story();
        let story_id = story.id.clone();
        store.insert_story(story).await;

        let step_b = Step::new(story_id.clone(), 2, "B".into(), "coding".into(), None, "desc".into());
        let step_a = Step::new(story_id.clone(), 1, "A".into(), "coding".into(), None, "desc".into());
        store.insert_step(step_b).await.unwrap();
        store.insert_step(step_a).await.unwrap();

        let steps = store.list_steps(&story_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "A");
        assert_eq!(steps[1].name, "B");
    }

    #[tokio::test]
    async fn with_story_mut_persists_the_mutation() {
        let store = InMemoryStoryStore::new();
        let story = new_story();
        let id = story.id.clone();
        store.insert_story(story).await;

        store
            .with_story_mut(&id, |s| {
                s.title = "renamed".into();
                Ok(())
            })
            .await
            .unwrap();

        let fetched = store.get_story(&id).await.unwrap();
        assert_eq!(fetched.title, "renamed");
    }
}

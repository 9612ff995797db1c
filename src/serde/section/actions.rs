//! Codec for the deferred action queue.

use tracing::warn;

use crate::region::{QueuedAction, RegionRecord};
use crate::serde::tag::{Tag, TagCompound};

use super::{SectionCodec, SectionError};


const QUEUE_KEY: &str = "queuedActions";


/// Persists the not-yet-applied tail of the action queue. Same merge and skip
/// semantics as the structure queue codec.
pub struct ActionQueueCodec;

impl SectionCodec for ActionQueueCodec {

    fn name(&self) -> &'static str {
        "action queue"
    }

    fn read_section(
        &self,
        region: &RegionRecord,
        root: &TagCompound,
        _generated: bool,
    ) -> Result<(), SectionError> {

        let Some(entries) = root.get_list(QUEUE_KEY) else {
            return Ok(());
        };

        let mut content = region.content();

        for entry in entries {
            match entry.as_compound().and_then(action_from_tag) {
                Some(queued) => content.push_action(queued),
                None => {
                    let pos = region.pos();
                    warn!("skipping malformed queued action in region {}/{}", pos.x, pos.y);
                }
            }
        }

        Ok(())

    }

    fn write_section(
        &self,
        region: &RegionRecord,
        root: &mut TagCompound,
        _generated: bool,
    ) -> Result<(), SectionError> {

        let content = region.content();

        let entries = content.queued_actions().iter()
            .map(|queued| {
                let mut compound = TagCompound::new();
                compound.insert("id", Tag::String(queued.kind.clone()));
                compound.insert("data", Tag::Compound(queued.data.clone()));
                Tag::Compound(compound)
            })
            .collect();

        root.insert(QUEUE_KEY, Tag::List(entries));
        Ok(())

    }

}

fn action_from_tag(compound: &TagCompound) -> Option<QueuedAction> {
    Some(QueuedAction {
        kind: compound.get_string("id")?.to_string(),
        data: compound.get_compound("data")?.clone(),
    })
}

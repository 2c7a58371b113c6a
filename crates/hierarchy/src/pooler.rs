//! Pooler (§4.6): embeds leaf statements via an `Embedder` and
//! mean-pools their vectors up through blocks, the message, and the
//! session. Grounded in the teacher's general "batch then pool" shape
//! used by `crates/intelligence/src/embed/mod.rs` for chunked batch
//! embedding, generalized here with the post-order propagation §4.6
//! specifies (no teacher module owns hierarchical pooling directly).

use memcore::{Level, NodeId, Result, BATCH_SIZE};
use mem_embedder::Embedder;

use crate::Hierarchy;

fn has_embedding(vector: &[f32]) -> bool {
    vector.iter().any(|&x| x != 0.0)
}

fn mean_normalize(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = vectors[0].len();
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (acc, x) in mean.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for x in mean.iter_mut() {
        *x /= n;
    }
    mem_storage::l2_normalize(&mut mean);
    mean
}

/// Generates leaf embeddings and mean-pools them up the tree (§4.6).
pub struct Pooler;

impl Pooler {
    /// Batch-embeds `leaf_texts` (in the order their statements were
    /// created) into the corresponding `leaf_ids`, writes each vector,
    /// then propagates pooled means from `message_id` up to the session.
    pub fn embed_message(
        hierarchy: &Hierarchy,
        embedder: &dyn Embedder,
        message_id: NodeId,
        leaf_ids: &[NodeId],
        leaf_texts: &[&str],
    ) -> Result<()> {
        assert_eq!(leaf_ids.len(), leaf_texts.len(), "leaf_ids and leaf_texts must be parallel");

        for (id_chunk, text_chunk) in leaf_ids.chunks(BATCH_SIZE).zip(leaf_texts.chunks(BATCH_SIZE)) {
            let vectors = embedder.embed_batch(text_chunk)?;
            for (id, vector) in id_chunk.iter().zip(vectors) {
                hierarchy.set_embedding(*id, &vector)?;
            }
        }

        let session_id = hierarchy
            .ancestors(message_id)?
            .into_iter()
            .find(|&id| hierarchy.level(id).ok() == Some(Level::Session));
        if let Some(session_id) = session_id {
            Self::propagate_session(hierarchy, session_id)?;
        }
        Ok(())
    }

    /// Post-order DFS from `session_id`: every internal node whose
    /// children have vectors is set to their normalized mean (§4.6).
    pub fn propagate_session(hierarchy: &Hierarchy, session_id: NodeId) -> Result<()> {
        Self::propagate(hierarchy, session_id)?;
        Ok(())
    }

    fn propagate(hierarchy: &Hierarchy, id: NodeId) -> Result<Option<Vec<f32>>> {
        let children = hierarchy.children(id)?;
        if children.is_empty() {
            let vector = hierarchy.get_embedding(id)?;
            return Ok(if has_embedding(&vector) { Some(vector.to_vec()) } else { None });
        }

        let mut child_vectors = Vec::with_capacity(children.len());
        for child in children {
            if let Some(v) = Self::propagate(hierarchy, child)? {
                child_vectors.push(v);
            }
        }

        if child_vectors.is_empty() {
            let vector = hierarchy.get_embedding(id)?;
            return Ok(if has_embedding(&vector) { Some(vector.to_vec()) } else { None });
        }

        let mean = mean_normalize(&child_vectors);
        hierarchy.set_embedding(id, &mean)?;
        Ok(Some(mean))
    }
}

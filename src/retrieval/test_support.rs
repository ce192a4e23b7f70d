//! Builders shared by the retrieval unit tests

use crate::retrieval::{Chunk, Document, LexicalHit, Passage, RankedCandidate, VectorHit};
use std::sync::Arc;

pub fn passage(id: &str, document_id: &str, chunk_index: usize) -> Passage {
    titled_passage(id, document_id, chunk_index, document_id)
}

pub fn titled_passage(id: &str, document_id: &str, chunk_index: usize, title: &str) -> Passage {
    let chunk = Chunk::new(id, document_id, chunk_index, format!("content of {}", id));
    let document = Document::new(document_id, title, format!("/docs/{}.pdf", document_id));
    Passage::new(Arc::new(chunk), Arc::new(document))
}

pub fn toc_passage(id: &str, document_id: &str) -> Passage {
    let mut chunk = Chunk::new(id, document_id, 0, "1. Introduction ..... 3");
    chunk.is_toc = true;
    let document = Document::new(document_id, document_id, format!("/docs/{}.pdf", document_id));
    Passage::new(Arc::new(chunk), Arc::new(document))
}

pub fn vector(passage: &Passage, similarity: f32) -> VectorHit {
    VectorHit {
        passage: passage.clone(),
        similarity,
    }
}

pub fn lexical(passage: &Passage, rank: usize) -> LexicalHit {
    LexicalHit {
        passage: passage.clone(),
        rank,
    }
}

/// Vector-only candidate with a fixed fused score and position
pub fn candidate(passage: &Passage, score: f64, fused_rank: usize) -> RankedCandidate {
    RankedCandidate {
        passage: passage.clone(),
        vector_similarity: Some(0.5),
        vector_rank: Some(fused_rank),
        lexical_rank: None,
        rrf_score: score,
        title_boost: 0.0,
        fused_score: score,
        fused_rank,
        rank: fused_rank,
    }
}

use proptest::prelude::*;
use juris_core::{chunk, search, Bm25Index, Bm25Params, Chunk, SearchOptions};

fn reconstruct(pieces: &[String], overlap: usize) -> String {
    let mut out = String::new();
    for (idx, piece) in pieces.iter().enumerate() {
        if idx == 0 {
            out.push_str(piece);
        } else {
            out.extend(piece.chars().skip(overlap));
        }
    }
    out
}

proptest! {
    #[test]
    fn windows_reconstruct_the_input(
        text in "[а-яa-z .,]{0,300}",
        size in 1usize..50,
        overlap_seed in 0usize..50,
    ) {
        let overlap = overlap_seed % size;
        let pieces = chunk(&text, size, overlap).unwrap();
        prop_assert_eq!(reconstruct(&pieces, overlap), text.clone());
        for piece in &pieces {
            prop_assert!(piece.chars().count() <= size);
        }
        for pair in pieces.windows(2) {
            let tail: String = pair[0].chars().skip(size - overlap).collect();
            let head: String = pair[1].chars().take(overlap).collect();
            prop_assert_eq!(tail, head);
        }
    }

    #[test]
    fn search_is_bounded_and_sorted(
        docs in prop::collection::vec("[абвгд ]{1,40}", 1..20),
        query in "[абвгд ]{1,12}",
        top_n in 1usize..8,
        min_score in 0.0f32..1.5,
    ) {
        let corpus: Vec<Chunk> = docs
            .iter()
            .enumerate()
            .map(|(idx, text)| Chunk::new("p", idx, text.as_str()))
            .collect();
        let index = Bm25Index::build(corpus, Bm25Params::default()).unwrap();
        let options = SearchOptions { top_n, min_score, ..SearchOptions::default() };
        let hits = search(&index, &query, &options).unwrap();
        prop_assert!(hits.len() <= top_n);
        for hit in &hits {
            prop_assert!(hit.score >= min_score);
        }
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }
}

//! Searchable documents, prefix terms, matching and ranking.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
};

use serde::{Deserialize, Serialize};

use crate::catalog::{BrandRecord, ModelRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    pub id: i64,
    pub name: String,
    pub brand_name: String,
    pub brand_slug: String,
    pub model_slug: String,
    /// `<brand-slug>-<model-slug>`.
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<String>,
}

impl SearchDocument {
    pub fn new(brand: &BrandRecord, model: &ModelRecord) -> Self {
        let brand_slug = brand.slug();
        let model_slug = model.slug();
        Self {
            id: model.id,
            name: model.name.clone(),
            brand_name: brand.name.clone(),
            slug: format!("{brand_slug}-{model_slug}"),
            brand_slug,
            model_slug,
            hero_image: model.hero_image.clone(),
        }
    }

    /// Lowercased words of `<brand> <name>`.
    pub fn words(&self) -> Vec<String> {
        normalize_query(&format!("{} {}", self.brand_name, self.name))
            .split(' ')
            .map(str::to_string)
            .collect()
    }

    /// Every prefix term this document is posted under: progressive prefixes of the
    /// name, the brand, `<brand> <name>`, and of each individual word.
    pub fn terms(&self) -> BTreeSet<String> {
        let name = normalize_query(&self.name);
        let brand = normalize_query(&self.brand_name);
        let full = normalize_query(&format!("{brand} {name}"));

        let mut terms = BTreeSet::new();
        for phrase in [&name, &brand, &full] {
            terms.extend(prefixes(phrase));
        }
        for word in full.split(' ') {
            terms.extend(prefixes(word));
        }
        terms.remove("");
        terms
    }

    /// Every query token is a prefix of some word. `query` must be normalized.
    pub fn matches(&self, query: &str) -> bool {
        let words = self.words();
        query
            .split(' ')
            .filter(|token| !token.is_empty())
            .all(|token| words.iter().any(|word| word.starts_with(token)))
    }

    /// 0 when the name or brand starts with `query`, 1 for any other word-prefix match.
    pub fn rank(&self, query: &str) -> u8 {
        let name = normalize_query(&self.name);
        let brand = normalize_query(&self.brand_name);
        let prefixed = name.starts_with(query)
            || brand.starts_with(query)
            || format!("{brand} {name}").starts_with(query);
        u8::from(!prefixed)
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Documents for every active model whose brand exists.
pub fn build_documents(brands: &[BrandRecord], models: &[ModelRecord]) -> Vec<SearchDocument> {
    let brands: HashMap<i64, &BrandRecord> = brands.iter().map(|b| (b.id, b)).collect();
    models
        .iter()
        .filter(|model| model.is_active())
        .filter_map(|model| {
            brands
                .get(&model.brand_id)
                .map(|brand| SearchDocument::new(brand, model))
        })
        .collect()
}

/// Filter to matches, order by rank then name, and truncate.
pub fn rank_matches<'a>(
    candidates: impl IntoIterator<Item = &'a SearchDocument>,
    query: &str,
    limit: usize,
) -> Vec<SearchDocument> {
    let mut ranked: Vec<(u8, &SearchDocument)> = candidates
        .into_iter()
        .filter(|doc| doc.matches(query))
        .map(|doc| (doc.rank(query), doc))
        .collect();
    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        rank_a
            .cmp(rank_b)
            .then_with(|| compare_names(a, b))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, doc)| doc.clone())
        .collect()
}

fn compare_names(a: &SearchDocument, b: &SearchDocument) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

fn prefixes(phrase: &str) -> impl Iterator<Item = String> + '_ {
    phrase
        .char_indices()
        .map(|(idx, ch)| phrase[..idx + ch.len_utf8()].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelStatus;

    fn brand(id: i64, name: &str) -> BrandRecord {
        BrandRecord {
            id,
            name: name.to_string(),
            slug: None,
        }
    }

    fn model(id: i64, brand_id: i64, name: &str) -> ModelRecord {
        ModelRecord {
            id,
            name: name.to_string(),
            brand_id,
            slug: None,
            hero_image: None,
            status: ModelStatus::Active,
            is_popular: false,
        }
    }

    fn nexon() -> SearchDocument {
        SearchDocument::new(&brand(1, "Tata"), &model(10, 1, "Nexon EV"))
    }

    #[test]
    fn document_slugs() {
        let doc = nexon();
        assert_eq!(doc.brand_slug, "tata");
        assert_eq!(doc.model_slug, "nexon-ev");
        assert_eq!(doc.slug, "tata-nexon-ev");
    }

    #[test]
    fn normalization_trims_lowercases_and_collapses() {
        assert_eq!(normalize_query("  Nexon \t  EV "), "nexon ev");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn terms_cover_progressive_prefixes() {
        let terms = nexon().terms();
        for term in ["n", "ne", "nex", "nexo", "nexon", "nexon ev", "e", "ev", "t", "tata n"] {
            assert!(terms.contains(term), "missing term {term:?}");
        }
        assert!(!terms.contains("exon"));
        assert!(!terms.contains(""));
    }

    #[test]
    fn prefix_queries_match_and_infixes_do_not() {
        let doc = nexon();
        for query in ["n", "ne", "nex", "nexon", "nexon ev", "ev", "tata nex"] {
            assert!(doc.matches(query), "{query:?} should match");
        }
        assert!(!doc.matches("exon"));
        assert!(!doc.matches("nexon x"));
    }

    #[test]
    fn name_and_brand_prefixes_outrank_word_matches() {
        let brands = [brand(1, "Tata"), brand(2, "Mahindra")];
        let models = [
            model(1, 1, "Harrier"),
            model(2, 2, "Thar"),
            model(3, 1, "Tiago"),
            model(4, 2, "Scorpio Turbo"),
            model(5, 2, "XUV 3XO"),
        ];
        let docs = build_documents(&brands, &models);

        let names: Vec<_> = rank_matches(&docs, "t", 10)
            .into_iter()
            .map(|doc| doc.name)
            .collect();
        // Name and brand prefixes share a tier ordered by name; inner words come last.
        assert_eq!(names, ["Harrier", "Thar", "Tiago", "Scorpio Turbo"]);
    }

    #[test]
    fn inactive_models_and_orphans_are_skipped() {
        let mut discontinued = model(2, 1, "Indica");
        discontinued.status = ModelStatus::Discontinued;
        let docs = build_documents(
            &[brand(1, "Tata")],
            &[model(1, 1, "Punch"), discontinued, model(3, 99, "Orphan")],
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "Punch");
    }

    #[test]
    fn limit_truncates_after_ranking() {
        let docs = build_documents(
            &[brand(1, "Tata")],
            &[model(1, 1, "Altroz"), model(2, 1, "Punch"), model(3, 1, "Nexon")],
        );
        assert_eq!(rank_matches(&docs, "tata", 2).len(), 2);
    }
}

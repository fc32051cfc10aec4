// ==========================================
// 经销商库存同步系统 - 实体解析引擎
// ==========================================
// 职责: 自由文本经销商/产品引用 → 目录实体（分级匹配）
// 红线: 只读、无副作用、不抛错；查不到返回 None
// ==========================================
// 经销商: 唯一编码精确匹配（命中即返回）
//         → 名称/别名忽略大小写相等 → 双向子串
// 产品:   精确（trim + 忽略大小写）→ 去括号后精确 → 子串
//         → 首个有效词前缀 + 数字片段打分
// 并列:   一律取 id 最小者
// ==========================================

use crate::domain::catalog::{CatalogSnapshot, Dealer, Product};
use crate::importer::data_cleaner::DataCleaner;
use crate::repository::CatalogRepository;
use std::collections::HashSet;
use tracing::{debug, warn};

// 有效词最少字母数
const SIGNIFICANT_WORD_MIN_ALPHA: usize = 3;

/// 预处理后的产品名
struct ProductEntry {
    product: Product,
    lowered: String,
    stripped: String, // 去括号后小写
    numbers: HashSet<String>,
}

pub struct EntityResolver {
    dealers: Vec<Dealer>,
    products: Vec<ProductEntry>,
    cleaner: DataCleaner,
}

impl EntityResolver {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        let cleaner = DataCleaner;
        // CatalogSnapshot::new 已按 id 升序，线性扫描中首个命中即最小 id
        let products = snapshot
            .products
            .into_iter()
            .map(|product| {
                let lowered = product.name.trim().to_lowercase();
                let stripped = cleaner.strip_parentheticals(&lowered);
                let numbers = numeric_tokens(&lowered);
                ProductEntry {
                    product,
                    lowered,
                    stripped,
                    numbers,
                }
            })
            .collect();

        Self {
            dealers: snapshot.dealers,
            products,
            cleaner,
        }
    }

    /// 从目录仓储加载快照；加载失败退化为空目录
    pub fn from_repository(repo: &dyn CatalogRepository) -> Self {
        match repo.load_snapshot() {
            Ok(snapshot) => {
                debug!(
                    dealers = snapshot.dealers.len(),
                    products = snapshot.products.len(),
                    "目录快照加载完成"
                );
                Self::new(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "目录快照加载失败，本批次所有解析将返回 None");
                Self::new(CatalogSnapshot::default())
            }
        }
    }

    pub fn dealer_count(&self) -> usize {
        self.dealers.len()
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    // ==========================================
    // 经销商解析
    // ==========================================

    pub fn resolve_dealer(&self, name: Option<&str>, unique_id: Option<&str>) -> Option<&Dealer> {
        if let Some(id) = non_empty(unique_id) {
            // 编码命中才具权威性；未知编码继续按名称匹配
            if let Some(dealer) = self
                .dealers
                .iter()
                .find(|d| d.unique_id.as_deref().map(str::trim) == Some(id))
            {
                return Some(dealer);
            }
            debug!(unique_id = %id, "经销商编码未命中，改用名称匹配");
        }

        let name = non_empty(name)?.to_lowercase();

        // Tier 1: 名称或别名相等
        let exact = self.dealers.iter().find(|d| {
            d.name.trim().to_lowercase() == name
                || d
                    .alt_name
                    .as_deref()
                    .is_some_and(|alt| alt.trim().to_lowercase() == name)
        });
        if exact.is_some() {
            return exact;
        }

        // Tier 2: 双向子串
        self.dealers.iter().find(|d| {
            let canonical = d.name.trim().to_lowercase();
            let alt = d.alt_name.as_deref().map(|a| a.trim().to_lowercase());
            contains_either_way(&canonical, &name)
                || alt.is_some_and(|a| contains_either_way(&a, &name))
        })
    }

    // ==========================================
    // 产品解析
    // ==========================================

    /// 目录只有名称，没有编码；名称缺失时把编码当作名称尝试
    pub fn resolve_product(&self, code: Option<&str>, name: Option<&str>) -> Option<&Product> {
        let query = non_empty(name).or_else(|| non_empty(code))?;
        self.resolve_product_by_name(query)
    }

    fn resolve_product_by_name(&self, raw: &str) -> Option<&Product> {
        let lowered = raw.trim().to_lowercase();

        // Tier 1: 精确
        if let Some(entry) = self.products.iter().find(|p| p.lowered == lowered) {
            return Some(&entry.product);
        }

        // Tier 2: 双方去括号后精确
        let stripped = self.cleaner.strip_parentheticals(&lowered);
        if !stripped.is_empty() {
            if let Some(entry) = self.products.iter().find(|p| p.stripped == stripped) {
                return Some(&entry.product);
            }
        }

        // Tier 3: 子串（任一方向）
        if let Some(entry) = self
            .products
            .iter()
            .find(|p| contains_either_way(&p.lowered, &lowered))
        {
            return Some(&entry.product);
        }

        // Tier 4: 首个有效词前缀，多个候选时按共享数字片段打分
        let word = significant_word(&stripped)?;
        let query_numbers = numeric_tokens(&lowered);
        let mut best: Option<(&ProductEntry, usize)> = None;
        for entry in self.products.iter().filter(|p| p.stripped.starts_with(word)) {
            let score = entry.numbers.intersection(&query_numbers).count();
            // 严格大于，保证并列取 id 最小
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((entry, score));
            }
        }

        if let Some((entry, score)) = best {
            debug!(query = %raw, matched = %entry.product.name, score, "产品前缀匹配");
        }
        best.map(|(entry, _)| &entry.product)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn contains_either_way(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

fn significant_word(name: &str) -> Option<&str> {
    name.split_whitespace().find(|token| {
        token.chars().filter(|c| c.is_alphabetic()).count() >= SIGNIFICANT_WORD_MIN_ALPHA
    })
}

/// 名称中所有连续数字片段
fn numeric_tokens(name: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut current = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            tokens.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dealer(id: i64, unique_id: Option<&str>, name: &str, alt: Option<&str>) -> Dealer {
        Dealer {
            id,
            unique_id: unique_id.map(str::to_string),
            name: name.to_string(),
            alt_name: alt.map(str::to_string),
        }
    }

    fn product(id: i64, name: &str) -> Product {
        Product {
            id,
            name: name.to_string(),
        }
    }

    fn resolver() -> EntityResolver {
        EntityResolver::new(CatalogSnapshot::new(
            vec![
                dealer(3, Some("D-003"), "Acme Pharma Mandalay", None),
                dealer(1, Some("D-001"), "Acme Pharma", Some("ACME")),
                dealer(2, Some("D-002"), "Beta Medical Supplies", None),
            ],
            vec![
                product(10, "Paracetamol 500mg Tablet"),
                product(11, "Paracetamol 250mg Syrup"),
                product(12, "Amoxicillin (Caps) 250mg"),
                product(13, "Vitamin C"),
            ],
        ))
    }

    #[test]
    fn test_dealer_unique_id_is_authoritative() {
        let r = resolver();
        // 编码指向 D-002，即使名称是 Acme
        let d = r.resolve_dealer(Some("Acme Pharma"), Some("D-002")).unwrap();
        assert_eq!(d.id, 2);
    }

    #[test]
    fn test_unknown_unique_id_falls_through_to_name() {
        let r = resolver();
        let d = r.resolve_dealer(Some("acme pharma"), Some("D-999")).unwrap();
        assert_eq!(d.id, 1);
    }

    #[test]
    fn test_dealer_alt_name_and_substring() {
        let r = resolver();
        assert_eq!(r.resolve_dealer(Some("acme"), None).unwrap().id, 1);
        assert_eq!(r.resolve_dealer(Some("Beta Medical"), None).unwrap().id, 2);
        assert!(r.resolve_dealer(Some("Gamma Traders"), None).is_none());
        assert!(r.resolve_dealer(None, None).is_none());
    }

    #[test]
    fn test_dealer_substring_tie_breaks_on_lowest_id() {
        let r = resolver();
        // "pharma" 同时是 1 和 3 的子串
        assert_eq!(r.resolve_dealer(Some("pharma"), None).unwrap().id, 1);
    }

    #[test]
    fn test_product_exact_and_bracket_stripped() {
        let r = resolver();
        assert_eq!(
            r.resolve_product(Some("X"), Some("  PARACETAMOL 500MG TABLET ")).unwrap().id,
            10
        );
        assert_eq!(
            r.resolve_product(None, Some("Amoxicillin 250mg (Box of 10)")).unwrap().id,
            12
        );
    }

    #[test]
    fn test_product_prefix_with_numeric_scoring() {
        let r = resolver();
        // 前缀 paracetamol 命中 10 和 11，250 只与 11 共享
        assert_eq!(
            r.resolve_product(None, Some("Paracetamol Susp 250")).unwrap().id,
            11
        );
        // 无共享数字时取最小 id
        assert_eq!(
            r.resolve_product(None, Some("Paracetamol Generic")).unwrap().id,
            10
        );
    }

    #[test]
    fn test_product_falls_back_to_code_and_tolerates_miss() {
        let r = resolver();
        assert_eq!(r.resolve_product(Some("vitamin c"), None).unwrap().id, 13);
        assert!(r.resolve_product(Some("P-404"), Some("Unknown Drug")).is_none());
        assert!(r.resolve_product(None, None).is_none());
    }

    #[test]
    fn test_empty_catalog_resolves_nothing() {
        let r = EntityResolver::new(CatalogSnapshot::default());
        assert!(r.resolve_dealer(Some("Acme"), Some("D-001")).is_none());
        assert!(r.resolve_product(Some("P-1"), Some("Paracetamol")).is_none());
    }

    #[test]
    fn test_numeric_tokens() {
        let tokens = numeric_tokens("abc 500mg x10");
        assert!(tokens.contains("500"));
        assert!(tokens.contains("10"));
        assert_eq!(tokens.len(), 2);
    }
}

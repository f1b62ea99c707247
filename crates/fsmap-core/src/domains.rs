//! Company domains and the extra classification rules each one adds to the
//! generative prompt.

/// Domain used when none is configured or the configured one is unknown
pub const DEFAULT_DOMAIN: &str = "General Business";

/// Supported company domains, default first
pub const DOMAINS: [&str; 5] = [
    DEFAULT_DOMAIN,
    "SaaS / IT Services",
    "Manufacturing",
    "Retail / E-commerce",
    "Services / Consulting",
];

const BASE_RULES: &str = "\
===== ACCOUNT TYPES =====

NOMINAL ACCOUNTS (Profit & Loss):
- Expenses: salaries, wages, rent, utilities, insurance, repairs, advertising
- Incomes: sales, service revenue, interest income, commission income
- Losses and gains: sale of assets, foreign exchange
- Purchases of goods for resale, discounts given or received

REAL ACCOUNTS (Balance Sheet):
- Tangible assets: land, building, plant & machinery, furniture, vehicles, cash, inventory
- Intangible assets: goodwill, patents, trademarks, software
- Accumulated depreciation, investments

PERSONAL ACCOUNTS (Balance Sheet):
- Debtors, creditors, bank accounts, loans taken or given, capital, drawings
";

const SAAS_RULES: &str = "\
SAAS / IT SERVICES:
- Purchased software licenses and capitalized development costs: Balance Sheet
- Cloud hosting and AWS / Azure / GCP bills: Profit & Loss (expense)
- SaaS tool subscriptions, domain and SSL costs: Profit & Loss (expense)
- Customer subscription revenue: Profit & Loss (income)
";

const MANUFACTURING_RULES: &str = "\
MANUFACTURING:
- Raw materials, work in progress, finished goods: Balance Sheet (current asset)
- Factory rent and direct labor: Profit & Loss (direct expense)
- Indirect labor: Profit & Loss (manufacturing overhead)
- Machinery purchase: Balance Sheet (fixed asset). Machinery repairs: Profit & Loss
";

const RETAIL_RULES: &str = "\
RETAIL / E-COMMERCE:
- Inventory / stock: Balance Sheet (current asset)
- Payment gateway charges, shipping, packaging, platform fees: Profit & Loss (expense)
- Returns and refunds: Profit & Loss (contra revenue)
- Store fixtures: Balance Sheet (fixed asset)
";

const SERVICES_RULES: &str = "\
SERVICES / CONSULTING:
- Professional fees revenue: Profit & Loss (income). Consultant payments: Profit & Loss (expense)
- Project advances received and deferred revenue: Balance Sheet (current liability)
- Unbilled revenue: Balance Sheet (current asset)
- Office supplies: Profit & Loss (expense)
";

const GENERAL_RULES: &str = "\
GENERAL BUSINESS:
- Follow the standard nominal / real / personal classification
- When in doubt, decide whether the item is income or expense (Profit & Loss) or asset or liability (Balance Sheet)
";

/// Whether `domain` is one of the supported domains
pub fn is_known(domain: &str) -> bool {
    DOMAINS.contains(&domain)
}

/// Base rules followed by the rules specific to `domain`
///
/// Unknown domains get the general business rules.
pub fn domain_rules(domain: &str) -> String {
    let specific = match domain {
        "SaaS / IT Services" => SAAS_RULES,
        "Manufacturing" => MANUFACTURING_RULES,
        "Retail / E-commerce" => RETAIL_RULES,
        "Services / Consulting" => SERVICES_RULES,
        _ => GENERAL_RULES,
    };
    format!("{}\n{}", BASE_RULES, specific)
}

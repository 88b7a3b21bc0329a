//! Tokenizing and clause parsing shared by the intent matchers and the plan builder.
//!
//! Parsing is hand-rolled over a small vocabulary: each clause of an utterance is
//! reduced to at most one [`Operation`], the unit the planner schedules.

use std::str::FromStr;

use rust_decimal::Decimal;

use shopdesk_core::domain::inventory::StockOperation;
use shopdesk_core::domain::order::OrderStatus;
use shopdesk_core::domain::EntityKind;

use crate::operation::{
    Operation, OrderLine, ProductFilter, Subject, DEFAULT_RESTOCK_QUANTITY, DEMO_CUSTOMERS, DEMO_ORDERS,
    DEMO_PRODUCTS,
};

const ARTICLES: &[&str] = &["a", "an", "the", "some", "please", "me", "my", "new", "all"];
const CONNECTORS: &[&str] = &["and", "then", "also", "plus", "afterwards"];
const PRONOUNS: &[&str] =
    &["it", "its", "this", "that", "her", "him", "them", "their", "his", "she", "he", "they"];
const ITEM_FILLER: &[&str] = &[
    "unit", "units", "x", "of", "piece", "pieces", "product", "products", "sku", "item", "items",
    "the", "a", "an", "id", "more",
];
const NAME_STOPS: &[&str] = &[
    "with", "email", "phone", "for", "and", "who", "at", "priced", "price", "costing", "costs",
    "sku", "in", "category", "stock", "quantity",
];
const STOCK_WORDS: &[&str] = &["stock", "inventory", "restock", "low-stock"];
const KNOWN_CATEGORIES: &[&str] =
    &["electronics", "sports", "home", "books", "furniture", "office", "tools", "general"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub lower: String,
    pub quoted: bool,
}

impl Token {
    fn new(text: &str, quoted: bool) -> Self {
        Self { text: text.to_string(), lower: text.to_ascii_lowercase(), quoted }
    }

    pub fn is(&self, word: &str) -> bool {
        !self.quoted && self.lower == word
    }

    pub fn is_any(&self, words: &[&str]) -> bool {
        !self.quoted && words.contains(&self.lower.as_str())
    }

    pub fn is_separator(&self) -> bool {
        !self.quoted && matches!(self.text.as_str(), "," | ";")
    }

    pub fn is_pronoun(&self) -> bool {
        self.is_any(PRONOUNS)
    }

    pub fn entity_id(&self) -> Option<EntityKind> {
        if self.quoted {
            return None;
        }
        EntityKind::of_id(&self.lower)
    }

    pub fn email(&self) -> Option<String> {
        if self.quoted {
            return None;
        }
        let (local, domain) = self.text.split_once('@')?;
        let valid = !local.is_empty() && domain.contains('.') && !domain.ends_with('.');
        valid.then(|| self.text.clone())
    }

    /// SKUs look like `WID-001`: a letter-led segment, a dash, and at least one digit.
    pub fn sku(&self) -> Option<String> {
        if self.quoted || self.text.contains('@') || self.entity_id().is_some() {
            return None;
        }
        let upper = self.text.to_ascii_uppercase();
        let (head, tail) = upper.split_once('-')?;
        let head_ok = head.chars().next().is_some_and(|ch| ch.is_ascii_alphabetic())
            && head.chars().all(|ch| ch.is_ascii_alphanumeric());
        let tail_ok = !tail.is_empty() && tail.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        let has_digit = upper.chars().any(|ch| ch.is_ascii_digit());
        (head_ok && tail_ok && has_digit).then_some(upper)
    }

    pub fn phone(&self) -> Option<String> {
        if self.quoted {
            return None;
        }
        let digits = self.text.chars().filter(char::is_ascii_digit).count();
        let shaped = self.text.chars().all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-'))
            && (self.text.starts_with('+') || self.text.contains('-'));
        (shaped && digits >= 7).then(|| self.text.clone())
    }

    pub fn integer(&self) -> Option<i64> {
        if self.quoted {
            return None;
        }
        let raw = self.lower.strip_suffix('x').unwrap_or(&self.lower);
        raw.parse::<i64>().ok()
    }

    /// `$12`, `12.50`, or `$12.50`. Bare integers only count when a caller has price context.
    pub fn price(&self) -> Option<Decimal> {
        if self.quoted {
            return None;
        }
        if let Some(raw) = self.lower.strip_prefix('$') {
            return Decimal::from_str(raw).ok();
        }
        if self.lower.contains('.') {
            return Decimal::from_str(&self.lower).ok();
        }
        None
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.price().or_else(|| self.integer().map(Decimal::from))
    }

    pub fn order_status(&self) -> Option<OrderStatus> {
        if self.quoted {
            return None;
        }
        OrderStatus::from_str(&self.lower).ok()
    }

    fn noun(&self) -> Option<EntityKind> {
        match self.lower.as_str() {
            _ if self.quoted => None,
            "product" | "products" => Some(EntityKind::Product),
            "customer" | "customers" | "client" | "clients" => Some(EntityKind::Customer),
            "order" | "orders" => Some(EntityKind::Order),
            _ => None,
        }
    }
}

pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\u{201c}' | '\u{201d}' => {
                flush(&mut current, &mut tokens);
                let mut quoted = String::new();
                for next in chars.by_ref() {
                    if matches!(next, '"' | '\u{201c}' | '\u{201d}') {
                        break;
                    }
                    quoted.push(next);
                }
                let quoted = quoted.trim();
                if !quoted.is_empty() {
                    tokens.push(Token::new(quoted, true));
                }
            }
            ',' | ';' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::new(&ch.to_string(), false));
            }
            ch if ch.is_whitespace() => flush(&mut current, &mut tokens),
            ch => current.push(ch),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<Token>) {
    let word = current
        .trim_matches(|ch: char| matches!(ch, '.' | '!' | '?' | ':' | '(' | ')' | '\''));
    if !word.is_empty() {
        tokens.push(Token::new(word, false));
    }
    current.clear();
}

fn is_boundary(tokens: &[Token], index: usize, token: &Token) -> bool {
    token.is_separator()
        || token.is_any(CONNECTORS)
        || (token.is("with") && starts_operation(&tokens[index + 1..]))
}

/// `with` only separates clauses when it introduces another entity or action.
fn starts_operation(rest: &[Token]) -> bool {
    rest.iter()
        .find(|token| !token.is_any(ARTICLES))
        .is_some_and(|token| token.noun().is_some() || Verb::of(token).is_some())
}

pub fn split_clauses(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut clauses = Vec::new();
    let mut current = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        if is_boundary(tokens, index, token) {
            if !current.is_empty() {
                clauses.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(token.clone());
    }
    if !current.is_empty() {
        clauses.push(current);
    }
    clauses
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedClause {
    pub operation: Operation,
    /// How sure the parse is, on the recognizer's 0-100 confidence scale.
    pub strength: u8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GoalParse {
    pub operations: Vec<Operation>,
    /// Clauses that carried words but no recognizable operation.
    pub leftovers: Vec<String>,
    pub strength: u8,
}

/// Splits `tokens` into clauses and parses each one. A clause made only of order items
/// (`... and 3 PROD-002`) extends the preceding order instead of standing alone.
pub fn parse_goal(tokens: &[Token]) -> GoalParse {
    if let Some(demo) = parse_demo_store(tokens) {
        return GoalParse { operations: vec![demo], leftovers: Vec::new(), strength: 90 };
    }
    let mut goal = GoalParse { strength: 100, ..GoalParse::default() };
    for clause in split_clauses(tokens) {
        if let Some(Operation::CreateOrder { customer, lines }) = goal.operations.last_mut() {
            if is_item_fragment(&clause) {
                lines.extend(parse_lines(&clause));
                if let Some(named) = customer_after_for(&clause) {
                    *customer = named;
                }
                continue;
            }
        }
        match parse_clause(&clause) {
            Some(parsed) => {
                goal.strength = goal.strength.min(parsed.strength);
                goal.operations.push(parsed.operation);
            }
            None if clause.iter().any(|token| !token.is_any(ARTICLES)) => {
                goal.leftovers.push(join(&clause));
            }
            None => {}
        }
    }
    if goal.operations.is_empty() {
        goal.strength = 0;
    }
    goal
}

/// `set up a demo store with 8 products and 4 customers`: read as one request, whatever it is joined by.
fn parse_demo_store(tokens: &[Token]) -> Option<Operation> {
    let demo = tokens.iter().any(|token| token.is_any(&["demo", "sample"]))
        && tokens.iter().any(|token| token.is_any(&["store", "shop"]));
    if !demo {
        return None;
    }
    let words: Vec<&Token> = tokens.iter().filter(|token| !token.is_any(ARTICLES)).collect();
    let count_of = |kind: EntityKind| {
        words.windows(2).find_map(|pair| {
            (pair[1].noun() == Some(kind)).then(|| pair[0].integer().and_then(|n| u32::try_from(n).ok())).flatten()
        })
    };
    Some(Operation::SetUpDemoStore {
        products: count_of(EntityKind::Product).unwrap_or(DEMO_PRODUCTS),
        customers: count_of(EntityKind::Customer).unwrap_or(DEMO_CUSTOMERS),
        orders: count_of(EntityKind::Order).unwrap_or(DEMO_ORDERS),
    })
}

fn is_item_fragment(clause: &[Token]) -> bool {
    let leads_with_item = clause
        .iter()
        .find(|token| !token.is_any(ARTICLES))
        .is_some_and(|token| token.integer().is_some() || token.sku().is_some());
    leads_with_item
        && clause.iter().all(|token| Verb::of(token).is_none())
        && !parse_lines(clause).is_empty()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verb {
    Create,
    Add,
    Remove,
    Show,
    Update,
    Order,
    Cancel,
    Ship,
    Deliver,
    Confirm,
    Mark,
    Deactivate,
    Activate,
}

impl Verb {
    fn of(token: &Token) -> Option<Self> {
        if token.quoted {
            return None;
        }
        let verb = match token.lower.as_str() {
            "create" | "register" | "make" | "insert" => Self::Create,
            "add" | "restock" | "increase" | "top" => Self::Add,
            "remove" | "subtract" | "reduce" | "decrease" | "deduct" => Self::Remove,
            "show" | "list" | "display" | "get" | "find" | "lookup" | "look" | "fetch" | "view"
            | "what" | "what's" | "which" | "search" | "how" => Self::Show,
            "update" | "set" | "change" | "adjust" => Self::Update,
            "buy" | "purchase" | "place" => Self::Order,
            "cancel" => Self::Cancel,
            "ship" => Self::Ship,
            "deliver" => Self::Deliver,
            "confirm" => Self::Confirm,
            "mark" => Self::Mark,
            "deactivate" | "discontinue" | "disable" | "retire" => Self::Deactivate,
            "activate" | "reactivate" | "enable" => Self::Activate,
            _ => return None,
        };
        Some(verb)
    }
}

/// Parses one clause. Returns `None` when no operation can be read from it.
pub fn parse_clause(tokens: &[Token]) -> Option<ParsedClause> {
    let words: Vec<&Token> = tokens.iter().filter(|token| !token.is_any(ARTICLES)).collect();
    let first = words.first()?;

    // A leading `order` followed by a quantity or a product is the verb, not the noun.
    let order_verb = first.is("order")
        && words.get(1).is_some_and(|next| next.integer().is_some() || next.sku().is_some());
    let verb = if order_verb { Some(Verb::Order) } else { words.iter().find_map(|t| Verb::of(t)) };
    let strength = if verb.is_some() { 90 } else { 60 };

    let noun = words
        .iter()
        .enumerate()
        .filter(|(index, _)| !(order_verb && *index == 0))
        .find_map(|(_, token)| token.noun());
    let stockish = words.iter().any(|token| token.is_any(STOCK_WORDS));

    let operation = match verb {
        Some(Verb::Add | Verb::Update) if stockish && mentions_low_stock(tokens) => Some(parse_restock(tokens)),
        Some(Verb::Order) => parse_order(tokens),
        Some(verb @ (Verb::Cancel | Verb::Ship | Verb::Deliver | Verb::Confirm | Verb::Mark)) => {
            parse_status_change(tokens, verb)
        }
        Some(Verb::Update) if is_status_update(tokens, noun) => {
            parse_status_change(tokens, Verb::Mark)
        }
        Some(verb @ (Verb::Update | Verb::Add | Verb::Remove))
            if stockish && !looks_like_creation(tokens, noun) =>
        {
            parse_stock_change(tokens, verb)
        }
        Some(Verb::Update) if words.iter().any(|token| token.is("price")) => parse_price_change(tokens),
        Some(Verb::Deactivate) => product_subject(tokens)
            .map(|product| Operation::UpdateProduct { product, price: None, active: Some(false) }),
        Some(Verb::Activate) => product_subject(tokens)
            .map(|product| Operation::UpdateProduct { product, price: None, active: Some(true) }),
        Some(Verb::Create | Verb::Add) => parse_creation(tokens, noun),
        Some(Verb::Remove | Verb::Update) => None,
        Some(Verb::Show) | None => parse_read(tokens, noun, stockish, verb.is_some()),
    }?;

    let strength = match operation {
        Operation::LookupProduct(_) | Operation::LookupCustomer(_) | Operation::LookupOrder(_)
            if verb.is_none() =>
        {
            70
        }
        _ => strength,
    };
    Some(ParsedClause { operation, strength })
}

fn looks_like_creation(tokens: &[Token], noun: Option<EntityKind>) -> bool {
    let creating_entity = noun.is_some_and(|kind| kind != EntityKind::Product);
    let describes_product = tokens.iter().any(|token| token.quoted || token.price().is_some());
    creating_entity || describes_product
}

fn is_status_update(tokens: &[Token], noun: Option<EntityKind>) -> bool {
    let about_order =
        noun == Some(EntityKind::Order) || tokens.iter().any(|t| t.entity_id() == Some(EntityKind::Order));
    about_order && tokens.iter().any(|token| token.order_status().is_some())
}

fn parse_status_change(tokens: &[Token], verb: Verb) -> Option<Operation> {
    let status = match verb {
        Verb::Cancel => OrderStatus::Cancelled,
        Verb::Ship => OrderStatus::Shipped,
        Verb::Deliver => OrderStatus::Delivered,
        Verb::Confirm => OrderStatus::Confirmed,
        _ => tokens.iter().filter_map(Token::order_status).last()?,
    };
    let explicit = tokens.iter().find(|t| t.entity_id() == Some(EntityKind::Order));
    let referenced = tokens.iter().any(|token| token.is_any(&["order", "orders"]) || token.is_pronoun());
    let order = match explicit {
        Some(token) => Subject::Id(token.lower.clone()),
        None if referenced => Subject::Contextual,
        None => return None,
    };
    Some(Operation::UpdateOrderStatus { order, status })
}

fn parse_stock_change(tokens: &[Token], verb: Verb) -> Option<Operation> {
    let product = product_subject(tokens).unwrap_or(Subject::Contextual);
    let quantity = value_after(tokens, &["to", "by"], Token::integer)
        .or_else(|| tokens.iter().filter(|t| t.sku().is_none()).filter_map(Token::integer).last())?;
    let operation = match verb {
        Verb::Add => StockOperation::Add,
        Verb::Remove => StockOperation::Subtract,
        _ => StockOperation::Set,
    };
    Some(Operation::UpdateStock { product, quantity, operation })
}

fn mentions_low_stock(tokens: &[Token]) -> bool {
    tokens.iter().any(|token| token.is_any(&["low", "low-stock"]))
}

/// `restock low stock products by 15`, optionally `below 5`.
fn parse_restock(tokens: &[Token]) -> Operation {
    let threshold = value_after(tokens, &["below", "under", "than", "threshold"], Token::integer);
    let quantity = value_after(tokens, &["by", "with"], Token::integer).unwrap_or(DEFAULT_RESTOCK_QUANTITY);
    Operation::RestockLowStock { threshold, quantity }
}

fn parse_price_change(tokens: &[Token]) -> Option<Operation> {
    let product = product_subject(tokens).unwrap_or(Subject::Contextual);
    let price = value_after(tokens, &["to"], Token::amount)
        .or_else(|| tokens.iter().find_map(Token::price))?;
    Some(Operation::UpdateProduct { product, price: Some(price), active: None })
}

fn parse_creation(tokens: &[Token], noun: Option<EntityKind>) -> Option<Operation> {
    if let Some(count) = bulk_count(tokens) {
        return Some(Operation::CreateProducts { count, category: category_of(tokens) });
    }
    match noun? {
        EntityKind::Customer => parse_customer(tokens),
        EntityKind::Product => Some(parse_product(tokens)),
        EntityKind::Order => parse_order(tokens),
    }
}

/// `create 5 products`: a quantity directly ahead of the product noun.
fn bulk_count(tokens: &[Token]) -> Option<u32> {
    let words: Vec<&Token> = tokens.iter().filter(|token| !token.is_any(ARTICLES)).collect();
    words.windows(2).find_map(|pair| {
        let count = pair[0].integer()?;
        let noun_follows = pair[1].noun() == Some(EntityKind::Product);
        let category_then_noun = pair[1].is_any(KNOWN_CATEGORIES)
            && words.iter().any(|token| token.noun() == Some(EntityKind::Product));
        (noun_follows || category_then_noun).then(|| u32::try_from(count).ok()).flatten()
    })
}

fn parse_customer(tokens: &[Token]) -> Option<Operation> {
    let email = tokens.iter().find_map(Token::email);
    let phone = tokens.iter().find_map(Token::phone);

    let names: Vec<String> = match tokens.iter().find(|token| token.quoted) {
        Some(quoted) => quoted.text.split_whitespace().map(str::to_string).collect(),
        None => words_after_noun(tokens, EntityKind::Customer),
    };
    let mut names = names.into_iter();
    let first_name = names.next();
    let rest: Vec<String> = names.collect();
    let last_name = (!rest.is_empty()).then(|| rest.join(" "));

    if first_name.is_none() && email.is_none() {
        return None;
    }
    Some(Operation::CreateCustomer { first_name, last_name, email, phone })
}

fn parse_product(tokens: &[Token]) -> Operation {
    let name = tokens
        .iter()
        .find(|token| token.quoted)
        .map(|token| token.text.clone())
        .or_else(|| {
            let words = words_after_noun(tokens, EntityKind::Product);
            (!words.is_empty()).then(|| words.join(" "))
        });
    let price = tokens.iter().find_map(Token::price).or_else(|| {
        value_after(tokens, &["for", "at", "price", "priced", "costing", "costs"], Token::amount)
    });
    let stock = value_after(tokens, &["stock", "quantity", "qty"], Token::integer).or_else(|| {
        tokens.windows(2).find_map(|pair| {
            pair[1].is_any(&["units", "in"]).then(|| pair[0].integer()).flatten()
        })
    });

    Operation::CreateProduct {
        name,
        price,
        sku: tokens.iter().find_map(Token::sku),
        category: category_of(tokens),
        stock,
    }
}

fn parse_order(tokens: &[Token]) -> Option<Operation> {
    let lines = parse_lines(tokens);
    if lines.is_empty() {
        return None;
    }
    let customer = customer_after_for(tokens).unwrap_or(Subject::Contextual);
    Some(Operation::CreateOrder { customer, lines })
}

/// Reads `<qty> [units of] <sku|id|it>` pairs; a bare SKU counts as one unit.
fn parse_lines(tokens: &[Token]) -> Vec<OrderLine> {
    let mut lines = Vec::new();
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        if token.is("for") {
            break;
        }
        if let Some(quantity) = token.integer().and_then(|value| u32::try_from(value).ok()) {
            let mut cursor = index + 1;
            while tokens.get(cursor).is_some_and(|next| next.is_any(ITEM_FILLER)) {
                cursor += 1;
            }
            if let Some(product) = tokens.get(cursor).and_then(line_product) {
                lines.push(OrderLine { product, quantity });
                index = cursor + 1;
                continue;
            }
        } else if let Some(sku) = token.sku() {
            lines.push(OrderLine { product: Subject::Key(sku), quantity: 1 });
        }
        index += 1;
    }
    lines
}

fn line_product(token: &Token) -> Option<Subject> {
    if let Some(sku) = token.sku() {
        return Some(Subject::Key(sku));
    }
    if token.entity_id() == Some(EntityKind::Product) {
        return Some(Subject::Id(token.lower.clone()));
    }
    token.is_any(&["it", "this", "that"]).then_some(Subject::Contextual)
}

fn customer_after_for(tokens: &[Token]) -> Option<Subject> {
    let position = tokens.iter().position(|token| token.is("for"))?;
    let target = tokens[position + 1..].iter().find(|token| !token.is_any(ARTICLES))?;
    if target.entity_id() == Some(EntityKind::Customer) {
        return Some(Subject::Id(target.lower.clone()));
    }
    if let Some(email) = target.email() {
        return Some(Subject::Key(email));
    }
    (target.is_pronoun() || target.noun() == Some(EntityKind::Customer)).then_some(Subject::Contextual)
}

fn product_subject(tokens: &[Token]) -> Option<Subject> {
    if let Some(token) = tokens.iter().find(|t| t.entity_id() == Some(EntityKind::Product)) {
        return Some(Subject::Id(token.lower.clone()));
    }
    if let Some(sku) = tokens.iter().find_map(Token::sku) {
        return Some(Subject::Key(sku));
    }
    tokens
        .iter()
        .any(|token| token.is_pronoun() || token.noun() == Some(EntityKind::Product))
        .then_some(Subject::Contextual)
}

fn parse_read(
    tokens: &[Token],
    noun: Option<EntityKind>,
    stockish: bool,
    has_verb: bool,
) -> Option<Operation> {
    if stockish && mentions_low_stock(tokens) {
        let threshold = value_after(tokens, &["below", "under", "than", "threshold"], Token::integer)
            .or_else(|| tokens.iter().find_map(Token::integer));
        return Some(Operation::LowStock { threshold });
    }

    let explicit = tokens.iter().find_map(|token| token.entity_id().map(|kind| (kind, token)));
    if let Some((kind, token)) = explicit {
        let id = Subject::Id(token.lower.clone());
        return Some(match (noun, kind) {
            (Some(EntityKind::Order), EntityKind::Customer) if mentions_plural(tokens, "orders") => {
                Operation::ListOrders { customer: Some(id), status: None }
            }
            (_, EntityKind::Product) => Operation::LookupProduct(id),
            (_, EntityKind::Customer) => Operation::LookupCustomer(id),
            (_, EntityKind::Order) => Operation::LookupOrder(id),
        });
    }

    let pronoun = tokens.iter().any(Token::is_pronoun);
    match noun {
        Some(EntityKind::Order) => {
            if !has_verb && !parse_lines(tokens).is_empty() {
                return parse_order(tokens);
            }
            let status = tokens.iter().find_map(Token::order_status);
            if mentions_plural(tokens, "orders") || status.is_some() {
                let customer = customer_after_for(tokens).or_else(|| {
                    tokens.iter().any(|t| t.is_any(&["her", "his", "their"])).then_some(Subject::Contextual)
                });
                return Some(Operation::ListOrders { customer, status });
            }
            Some(Operation::LookupOrder(Subject::Contextual))
        }
        Some(EntityKind::Customer) => {
            if let Some(email) = tokens.iter().find_map(Token::email) {
                return Some(Operation::LookupCustomer(Subject::Key(email)));
            }
            let query = words_after_noun(tokens, EntityKind::Customer);
            if query.is_empty() && pronoun && !mentions_plural(tokens, "customers") {
                return Some(Operation::LookupCustomer(Subject::Contextual));
            }
            let query = (!query.is_empty()).then(|| query.join(" "));
            Some(Operation::ListCustomers { query })
        }
        Some(EntityKind::Product) => {
            if let Some(sku) = tokens.iter().find_map(Token::sku) {
                return Some(Operation::LookupProduct(Subject::Key(sku)));
            }
            if pronoun && !mentions_plural(tokens, "products") {
                return Some(Operation::LookupProduct(Subject::Contextual));
            }
            Some(Operation::ListProducts(product_filter(tokens, has_verb)))
        }
        None => {
            let sku = tokens.iter().find_map(Token::sku);
            match sku {
                Some(sku) if has_verb || stockish => Some(Operation::LookupProduct(Subject::Key(sku))),
                _ if stockish && pronoun => Some(Operation::LookupProduct(Subject::Contextual)),
                _ => None,
            }
        }
    }
}

fn product_filter(tokens: &[Token], has_verb: bool) -> ProductFilter {
    let max_price = value_after(tokens, &["under", "below", "cheaper", "max", "maximum"], Token::amount)
        .or_else(|| value_after_phrase(tokens, &["less", "than"], Token::amount))
        .or_else(|| value_after_phrase(tokens, &["up", "to"], Token::amount));
    let min_price = value_after(tokens, &["over", "above", "min", "minimum"], Token::amount)
        .or_else(|| value_after_phrase(tokens, &["more", "than"], Token::amount))
        .or_else(|| value_after_phrase(tokens, &["at", "least"], Token::amount));
    let in_stock_only = tokens.windows(2).any(|pair| pair[0].is("in") && pair[1].is("stock"))
        || tokens.iter().any(|token| token.is("available"));

    let query = if has_verb {
        let words: Vec<String> = words_after_noun(tokens, EntityKind::Product)
            .into_iter()
            .filter(|word| !word.eq_ignore_ascii_case("matching"))
            .collect();
        (!words.is_empty()).then(|| words.join(" "))
    } else {
        None
    };

    ProductFilter { query, category: category_of(tokens), min_price, max_price, in_stock_only }
}

fn category_of(tokens: &[Token]) -> Option<String> {
    let explicit = tokens.windows(2).find_map(|pair| {
        let introduces = pair[0].is_any(&["in", "category"]);
        let value = &pair[1];
        let plausible = !value.is_any(&["stock", "the", "a"]) && value.amount().is_none() && value.sku().is_none();
        (introduces && plausible).then(|| value.text.clone())
    });
    explicit.or_else(|| {
        tokens.iter().find(|token| token.is_any(KNOWN_CATEGORIES)).map(|token| capitalize(&token.lower))
    })
}

fn mentions_plural(tokens: &[Token], plural: &str) -> bool {
    tokens.iter().any(|token| token.is(plural))
}

/// Plain words following the first `kind` noun, up to the next stop word.
fn words_after_noun(tokens: &[Token], kind: EntityKind) -> Vec<String> {
    let Some(position) = tokens.iter().position(|token| token.noun() == Some(kind)) else {
        return Vec::new();
    };
    tokens[position + 1..]
        .iter()
        .skip_while(|token| token.is_any(&["named", "called", "matching", "for"]))
        .take_while(|token| {
            !token.is_any(NAME_STOPS)
                && !token.is_any(&["under", "below", "over", "above", "less", "more", "cheaper"])
                && token.email().is_none()
                && token.phone().is_none()
                && token.sku().is_none()
                && token.entity_id().is_none()
                && token.amount().is_none()
                && !token.is_separator()
        })
        .filter(|token| !token.is_any(ARTICLES) && !token.is_pronoun())
        .map(|token| token.text.clone())
        .collect()
}

fn value_after<T>(tokens: &[Token], markers: &[&str], read: impl Fn(&Token) -> Option<T>) -> Option<T> {
    tokens.windows(2).find_map(|pair| pair[0].is_any(markers).then(|| read(&pair[1])).flatten())
}

fn value_after_phrase<T>(
    tokens: &[Token],
    phrase: &[&str; 2],
    read: impl Fn(&Token) -> Option<T>,
) -> Option<T> {
    tokens.windows(3).find_map(|triple| {
        (triple[0].is(phrase[0]) && triple[1].is(phrase[1])).then(|| read(&triple[2])).flatten()
    })
}

pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(|token| token.text.as_str()).collect::<Vec<_>>().join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

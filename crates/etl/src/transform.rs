//! Parse-and-validate boundary between raw catalog JSON and typed entities.
//!
//! Every function here is pure. A record that fails validation produces a
//! [`SchemaMismatchError`]; the pipeline logs it, counts it as skipped and
//! moves on. Nothing downstream of this module ever sees a [`RawRecord`].

use std::collections::HashSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use thiserror::Error;

use cart_insights_core::{
    Cart, CartId, CartItem, Email, EmailError, ProductId, ProductRef, User, UserId,
};

use crate::source::RawRecord;

/// Decimal places kept for every monetary amount.
const MONEY_SCALE: u32 = 2;

/// Largest amount the `NUMERIC(14, 2)` money columns hold.
const MAX_MONEY: Decimal = {
    const MANTISSA: u64 = 99_999_999_999_999;
    #[allow(clippy::cast_possible_truncation)]
    Decimal::from_parts(MANTISSA as u32, (MANTISSA >> 32) as u32, 0, false, MONEY_SCALE)
};

/// Kind of record that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    User,
    Cart,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Cart => "cart",
        })
    }
}

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MismatchReason {
    #[error("expected a JSON object at `{0}`")]
    NotAnObject(String),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("field `{field}` should be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("field `{0}` is out of range")]
    OutOfRange(String),
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),
    #[error("product {0} appears more than once")]
    DuplicateProduct(ProductId),
    #[error("owning user {0} is not part of this sync")]
    UnknownUser(UserId),
}

/// A raw record that does not match the expected schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {}: {reason}", .record_id.map_or_else(|| "<no id>".to_owned(), |id| format!("#{id}")))]
pub struct SchemaMismatchError {
    pub kind: RecordKind,
    /// The record's `id`, when it could be read at all.
    pub record_id: Option<i64>,
    pub reason: MismatchReason,
}

impl SchemaMismatchError {
    fn new(kind: RecordKind, raw: &RawRecord, reason: MismatchReason) -> Self {
        Self {
            kind,
            record_id: raw.get("id").and_then(Value::as_i64),
            reason,
        }
    }
}

/// Normalize a raw user record.
///
/// Requires `id`, `firstName`, `lastName` and a valid `email`; `phone` and
/// `age` are optional.
///
/// # Errors
///
/// Returns `SchemaMismatchError` if a required field is absent or malformed.
pub fn normalize_user(raw: &RawRecord) -> Result<User, SchemaMismatchError> {
    parse_user(raw).map_err(|reason| SchemaMismatchError::new(RecordKind::User, raw, reason))
}

/// Normalize a raw cart record into the cart and its lines, in payload order.
///
/// # Errors
///
/// Returns `SchemaMismatchError` if the cart or any of its product lines is
/// malformed, or if a product appears twice in the same cart.
pub fn normalize_cart(raw: &RawRecord) -> Result<(Cart, Vec<CartItem>), SchemaMismatchError> {
    parse_cart(raw).map_err(|reason| SchemaMismatchError::new(RecordKind::Cart, raw, reason))
}

/// Reject a cart whose owner is not among `known_users`.
///
/// # Errors
///
/// Returns `SchemaMismatchError` with `MismatchReason::UnknownUser`.
pub fn ensure_known_owner(
    cart: &Cart,
    known_users: &HashSet<UserId>,
) -> Result<(), SchemaMismatchError> {
    if known_users.contains(&cart.user_id) {
        return Ok(());
    }
    Err(SchemaMismatchError {
        kind: RecordKind::Cart,
        record_id: Some(i64::from(cart.id.as_i32())),
        reason: MismatchReason::UnknownUser(cart.user_id),
    })
}

fn parse_user(raw: &RawRecord) -> Result<User, MismatchReason> {
    let fields = Fields::of(raw, "")?;

    Ok(User {
        id: UserId::new(fields.id("id")?),
        first_name: fields.text("firstName")?,
        last_name: fields.text("lastName")?,
        email: Email::parse(&fields.text("email")?)?,
        phone: fields.opt_text("phone")?,
        age: fields.opt_count("age")?,
    })
}

fn parse_cart(raw: &RawRecord) -> Result<(Cart, Vec<CartItem>), MismatchReason> {
    let fields = Fields::of(raw, "")?;

    let cart = Cart {
        id: CartId::new(fields.id("id")?),
        user_id: UserId::new(fields.id("userId")?),
        total: fields.money("total")?,
        discounted_total: fields.money("discountedTotal")?,
        total_products: fields.count("totalProducts")?,
        total_quantity: fields.count("totalQuantity")?,
    };

    let products = fields.array("products")?;
    let mut seen = HashSet::with_capacity(products.len());
    let mut items = Vec::with_capacity(products.len());

    for (index, product) in products.iter().enumerate() {
        let line = Fields::of(product, format!("products[{index}]"))?;
        let total = line.money("total")?;
        let item = CartItem {
            cart_id: cart.id,
            product: ProductRef {
                id: ProductId::new(line.id("id")?),
                title: line.text("title")?,
                price: line.money("price")?,
            },
            quantity: line.count("quantity")?,
            total,
            discount_percentage: line.percentage("discountPercentage")?,
            discounted_total: line.opt_money("discountedTotal")?.unwrap_or(total),
        };

        if !seen.insert(item.product.id) {
            return Err(MismatchReason::DuplicateProduct(item.product.id));
        }
        items.push(item);
    }

    Ok((cart, items))
}

/// Typed accessors over one JSON object, reporting dotted field paths.
struct Fields<'a> {
    object: &'a Map<String, Value>,
    path: String,
}

impl<'a> Fields<'a> {
    fn of(value: &'a Value, path: impl Into<String>) -> Result<Self, MismatchReason> {
        let path = path.into();
        match value {
            Value::Object(object) => Ok(Self { object, path }),
            _ => Err(MismatchReason::NotAnObject(if path.is_empty() {
                "$".to_owned()
            } else {
                path
            })),
        }
    }

    fn name(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_owned()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    /// Present and non-null.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.object.get(key).filter(|v| !v.is_null())
    }

    fn require(&self, key: &str) -> Result<&'a Value, MismatchReason> {
        self.get(key)
            .ok_or_else(|| MismatchReason::MissingField(self.name(key)))
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> MismatchReason {
        MismatchReason::WrongType {
            field: self.name(key),
            expected,
        }
    }

    fn integer(&self, key: &str) -> Result<i64, MismatchReason> {
        let value = self.require(key)?;
        value
            .as_i64()
            .ok_or_else(|| self.wrong_type(key, "an integer"))
    }

    /// Positive identifier that fits the `INTEGER` key columns.
    fn id(&self, key: &str) -> Result<i32, MismatchReason> {
        i32::try_from(self.integer(key)?)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| MismatchReason::OutOfRange(self.name(key)))
    }

    /// Non-negative count that fits the `INTEGER` columns.
    fn count(&self, key: &str) -> Result<u32, MismatchReason> {
        let value = self.integer(key)?;
        i32::try_from(value)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| MismatchReason::OutOfRange(self.name(key)))
    }

    fn opt_count(&self, key: &str) -> Result<Option<u32>, MismatchReason> {
        self.get(key).map(|_| self.count(key)).transpose()
    }

    fn text(&self, key: &str) -> Result<String, MismatchReason> {
        self.require(key)?
            .as_str()
            .map(|s| s.trim().to_owned())
            .ok_or_else(|| self.wrong_type(key, "a string"))
    }

    fn opt_text(&self, key: &str) -> Result<Option<String>, MismatchReason> {
        Ok(self
            .get(key)
            .map(|_| self.text(key))
            .transpose()?
            .filter(|s| !s.is_empty()))
    }

    fn decimal(&self, key: &str) -> Result<Decimal, MismatchReason> {
        let value = self.require(key)?;
        let parsed = match value {
            Value::Number(n) => parse_decimal(&n.to_string()),
            Value::String(s) => parse_decimal(s.trim()),
            _ => None,
        };
        parsed.ok_or_else(|| self.wrong_type(key, "a decimal number"))
    }

    /// Non-negative amount rounded to cents, no larger than [`MAX_MONEY`].
    fn money(&self, key: &str) -> Result<Decimal, MismatchReason> {
        let amount = self
            .decimal(key)?
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        if (amount.is_sign_negative() && !amount.is_zero()) || amount > MAX_MONEY {
            return Err(MismatchReason::OutOfRange(self.name(key)));
        }
        Ok(amount)
    }

    fn opt_money(&self, key: &str) -> Result<Option<Decimal>, MismatchReason> {
        self.get(key).map(|_| self.money(key)).transpose()
    }

    /// Percentage in `0..=100`, rounded to two places.
    fn percentage(&self, key: &str) -> Result<Decimal, MismatchReason> {
        let value = self.money(key)?;
        if value > Decimal::ONE_HUNDRED {
            return Err(MismatchReason::OutOfRange(self.name(key)));
        }
        Ok(value)
    }

    fn array(&self, key: &str) -> Result<&'a Vec<Value>, MismatchReason> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| self.wrong_type(key, "an array"))
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw_user() -> Value {
        json!({
            "id": 1,
            "firstName": "Emily",
            "lastName": "Johnson",
            "maidenName": "Smith",
            "age": 28,
            "email": "emily.johnson@x.dummyjson.com",
            "phone": "+81 965-431-3024",
            "address": {"city": "Phoenix"}
        })
    }

    fn raw_cart() -> Value {
        json!({
            "id": 1,
            "products": [
                {
                    "id": 168,
                    "title": "Charger SXT RWD",
                    "price": 32999.99,
                    "quantity": 3,
                    "total": 98999.97,
                    "discountPercentage": 13.39,
                    "discountedTotal": 85743.87
                },
                {
                    "id": 78,
                    "title": "Apple MacBook Pro 14 Inch Space Grey",
                    "price": 1999.99,
                    "quantity": 2,
                    "total": 3999.98,
                    "discountPercentage": 18.52,
                    "discountedTotal": 3259.18
                }
            ],
            "total": 102999.95,
            "discountedTotal": 89003.05,
            "userId": 33,
            "totalProducts": 2,
            "totalQuantity": 5
        })
    }

    fn reason(result: Result<impl std::fmt::Debug, SchemaMismatchError>) -> MismatchReason {
        result.unwrap_err().reason
    }

    #[test]
    fn test_normalize_user() {
        let user = normalize_user(&raw_user()).unwrap();
        assert_eq!(user.id, UserId::new(1));
        assert_eq!(user.first_name, "Emily");
        assert_eq!(user.last_name, "Johnson");
        assert_eq!(user.email.as_str(), "emily.johnson@x.dummyjson.com");
        assert_eq!(user.phone.as_deref(), Some("+81 965-431-3024"));
        assert_eq!(user.age, Some(28));
    }

    #[test]
    fn test_normalize_user_is_deterministic() {
        let raw = raw_user();
        assert_eq!(normalize_user(&raw).unwrap(), normalize_user(&raw).unwrap());
    }

    #[test]
    fn test_optional_user_fields() {
        let mut raw = raw_user();
        raw["phone"] = Value::Null;
        raw.as_object_mut().unwrap().remove("age");
        let user = normalize_user(&raw).unwrap();
        assert_eq!(user.phone, None);
        assert_eq!(user.age, None);
    }

    #[test]
    fn test_user_missing_required_field() {
        let mut raw = raw_user();
        raw.as_object_mut().unwrap().remove("lastName");
        let err = normalize_user(&raw).unwrap_err();
        assert_eq!(err.kind, RecordKind::User);
        assert_eq!(err.record_id, Some(1));
        assert_eq!(err.reason, MismatchReason::MissingField("lastName".to_owned()));
        assert_eq!(err.to_string(), "user #1: missing field `lastName`");
    }

    #[test]
    fn test_user_wrong_shapes() {
        let mut raw = raw_user();
        raw["id"] = json!("1");
        assert!(matches!(
            reason(normalize_user(&raw)),
            MismatchReason::WrongType { ref field, .. } if field == "id"
        ));

        let mut raw = raw_user();
        raw["age"] = json!(-4);
        assert_eq!(
            reason(normalize_user(&raw)),
            MismatchReason::OutOfRange("age".to_owned())
        );

        let mut raw = raw_user();
        raw["id"] = json!(0);
        assert_eq!(
            reason(normalize_user(&raw)),
            MismatchReason::OutOfRange("id".to_owned())
        );

        let mut raw = raw_user();
        raw["id"] = json!(i64::from(i32::MAX) + 1);
        assert_eq!(
            reason(normalize_user(&raw)),
            MismatchReason::OutOfRange("id".to_owned())
        );
    }

    #[test]
    fn test_user_invalid_email() {
        let mut raw = raw_user();
        raw["email"] = json!("not-an-email");
        assert_eq!(
            reason(normalize_user(&raw)),
            MismatchReason::InvalidEmail(EmailError::MissingAtSymbol)
        );
    }

    #[test]
    fn test_non_object_record() {
        let err = normalize_user(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.record_id, None);
        assert_eq!(err.reason, MismatchReason::NotAnObject("$".to_owned()));
        assert_eq!(err.to_string(), "user <no id>: expected a JSON object at `$`");
    }

    #[test]
    fn test_normalize_cart() {
        let (cart, items) = normalize_cart(&raw_cart()).unwrap();
        assert_eq!(cart.id, CartId::new(1));
        assert_eq!(cart.user_id, UserId::new(33));
        assert_eq!(cart.total, Decimal::new(10_299_995, 2));
        assert_eq!(cart.discounted_total, Decimal::new(8_900_305, 2));
        assert_eq!(cart.total_products, 2);
        assert_eq!(cart.total_quantity, 5);

        assert_eq!(items.len(), 2);
        let first = &items[0];
        assert_eq!(first.cart_id, cart.id);
        assert_eq!(first.product.id, ProductId::new(168));
        assert_eq!(first.product.title, "Charger SXT RWD");
        assert_eq!(first.product.price, Decimal::new(3_299_999, 2));
        assert_eq!(first.quantity, 3);
        assert_eq!(first.discount_percentage, Decimal::new(1339, 2));
        assert_eq!(first.discounted_total, Decimal::new(8_574_387, 2));
        assert_eq!(items[1].product.id, ProductId::new(78));
    }

    #[test]
    fn test_money_is_rounded_to_cents() {
        let mut raw = raw_cart();
        raw["total"] = json!(10.005);
        raw["discountedTotal"] = json!("7.1");
        let (cart, _) = normalize_cart(&raw).unwrap();
        assert_eq!(cart.total, Decimal::new(1001, 2));
        assert_eq!(cart.discounted_total, Decimal::new(710, 2));
    }

    #[test]
    fn test_line_discounted_total_defaults_to_total() {
        let mut raw = raw_cart();
        raw["products"][0].as_object_mut().unwrap().remove("discountedTotal");
        let (_, items) = normalize_cart(&raw).unwrap();
        assert_eq!(items[0].discounted_total, items[0].total);
    }

    #[test]
    fn test_cart_line_errors_name_the_path() {
        let mut raw = raw_cart();
        raw["products"][1]["quantity"] = json!(1.5);
        let err = normalize_cart(&raw).unwrap_err();
        assert_eq!(err.kind, RecordKind::Cart);
        assert_eq!(err.record_id, Some(1));
        assert_eq!(
            err.reason,
            MismatchReason::WrongType {
                field: "products[1].quantity".to_owned(),
                expected: "an integer",
            }
        );
    }

    #[test]
    fn test_cart_negative_price_rejected() {
        let mut raw = raw_cart();
        raw["products"][0]["price"] = json!(-1.0);
        assert_eq!(
            reason(normalize_cart(&raw)),
            MismatchReason::OutOfRange("products[0].price".to_owned())
        );
    }

    #[test]
    fn test_cart_amount_beyond_column_precision_rejected() {
        let mut raw = raw_cart();
        raw["total"] = json!(1e13);
        assert_eq!(
            reason(normalize_cart(&raw)),
            MismatchReason::OutOfRange("total".to_owned())
        );

        let mut raw = raw_cart();
        raw["products"][0]["discountedTotal"] = json!("100000000000000.00");
        assert_eq!(
            reason(normalize_cart(&raw)),
            MismatchReason::OutOfRange("products[0].discountedTotal".to_owned())
        );
    }

    #[test]
    fn test_cart_largest_storable_amount_accepted() {
        let mut raw = raw_cart();
        raw["total"] = json!("999999999999.99");
        let (cart, _) = normalize_cart(&raw).unwrap();
        assert_eq!(cart.total, MAX_MONEY);
    }

    #[test]
    fn test_cart_discount_over_hundred_rejected() {
        let mut raw = raw_cart();
        raw["products"][0]["discountPercentage"] = json!(120);
        assert_eq!(
            reason(normalize_cart(&raw)),
            MismatchReason::OutOfRange("products[0].discountPercentage".to_owned())
        );
    }

    #[test]
    fn test_cart_products_must_be_array_of_objects() {
        let mut raw = raw_cart();
        raw["products"] = json!({"id": 1});
        assert!(matches!(
            reason(normalize_cart(&raw)),
            MismatchReason::WrongType { ref field, .. } if field == "products"
        ));

        let mut raw = raw_cart();
        raw["products"] = json!([7]);
        assert_eq!(
            reason(normalize_cart(&raw)),
            MismatchReason::NotAnObject("products[0]".to_owned())
        );
    }

    #[test]
    fn test_cart_duplicate_product_rejected() {
        let mut raw = raw_cart();
        raw["products"][1]["id"] = json!(168);
        assert_eq!(
            reason(normalize_cart(&raw)),
            MismatchReason::DuplicateProduct(ProductId::new(168))
        );
    }

    #[test]
    fn test_empty_cart_is_valid() {
        let mut raw = raw_cart();
        raw["products"] = json!([]);
        let (_, items) = normalize_cart(&raw).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_ensure_known_owner() {
        let (cart, _) = normalize_cart(&raw_cart()).unwrap();
        let known: HashSet<UserId> = [UserId::new(33)].into_iter().collect();
        assert!(ensure_known_owner(&cart, &known).is_ok());

        let err = ensure_known_owner(&cart, &HashSet::new()).unwrap_err();
        assert_eq!(err.reason, MismatchReason::UnknownUser(UserId::new(33)));
        assert_eq!(err.to_string(), "cart #1: owning user 33 is not part of this sync");
    }
}

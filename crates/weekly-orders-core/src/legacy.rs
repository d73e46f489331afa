//! Ingestion of loosely-shaped configuration blobs.
//!
//! Stored configurations historically mixed camelCase and snake_case keys, used both
//! arrays and maps for item lists, and carried per-day food selections under
//! `deliveryDayOrders`. Everything is folded into [`StandingConfiguration`] here so the
//! rest of the engine only ever sees the closed type.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::configuration::{
    BoxOrder, BoxesPlan, CustomPlan, FoodPlan, FoodVendorSelection, ItemNotes, ItemQuantities,
    MealPlan, MealSelection, ServicePlan, StandingConfiguration, UnitValues,
};
use crate::model::{BoxTypeId, DeliveryDay, ItemId, ServiceKind, VendorId};
use crate::ReconcileError;

/// Normalize a legacy configuration blob into a validated [`StandingConfiguration`].
///
/// # Errors
/// Returns [`ReconcileError::Validation`] when the blob is not an object, has no
/// recognizable service kind, or carries malformed quantities, prices, or days.
pub fn parse_legacy_configuration(value: &Value) -> Result<StandingConfiguration, ReconcileError> {
    let object = value.as_object().ok_or_else(|| invalid("configuration MUST be a JSON object"))?;

    let kind = match text(object, &["serviceKind", "serviceType", "service_type"]) {
        Some(raw) => ServiceKind::parse(raw.trim())
            .ok_or_else(|| invalid(&format!("unknown service kind {raw:?}")))?,
        None => infer_kind(object)
            .ok_or_else(|| invalid("configuration has no recognizable service kind"))?,
    };

    let plan = match kind {
        ServiceKind::Food if !has_food_selections(object) && has_any(object, MEAL_KEYS) => {
            ServicePlan::Meal(parse_meal(object)?)
        }
        ServiceKind::Food => ServicePlan::Food(parse_food(object)?),
        ServiceKind::Meal => ServicePlan::Meal(parse_meal(object)?),
        ServiceKind::Boxes => ServicePlan::Boxes(parse_boxes(object)?),
        ServiceKind::Custom => ServicePlan::Custom(parse_custom(object)?),
    };

    let configuration = StandingConfiguration {
        plan,
        notes: text(object, &["notes"]).map(str::to_string),
        case_id: text(object, &["caseId", "case_id"]).map(str::to_string),
    }
    .normalized();
    configuration.validate()?;
    Ok(configuration)
}

const VENDOR_SELECTION_KEYS: &[&str] = &["vendorSelections", "vendor_selections"];
const DAY_ORDER_KEYS: &[&str] = &["deliveryDayOrders", "delivery_day_orders"];
const MEAL_KEYS: &[&str] = &["mealSelections", "meal_selections"];
const BOX_KEYS: &[&str] = &["boxOrders", "box_orders"];
const VENDOR_KEYS: &[&str] = &["vendorId", "vendor_id"];
const ITEM_KEYS: &[&str] = &["items", "itemQuantities", "item_quantities", "menuItems", "menu_items"];
const ITEM_ID_KEYS: &[&str] =
    &["menu_item_id", "menuItemId", "meal_item_id", "mealItemId", "itemId", "item_id", "id"];
const NOTE_KEYS: &[&str] = &["itemNotes", "item_notes"];
const UNIT_VALUE_KEYS: &[&str] = &["unitValues", "unit_values", "itemPrices", "item_prices"];

fn invalid(message: &str) -> ReconcileError {
    ReconcileError::Validation(message.to_string())
}

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| object.get(*key)).find(|value| !value.is_null())
}

fn has_any(object: &Map<String, Value>, keys: &[&str]) -> bool {
    field(object, keys).is_some()
}

fn text<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    field(object, keys).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

fn has_food_selections(object: &Map<String, Value>) -> bool {
    let non_empty = |value: &Value| match value {
        Value::Array(entries) => !entries.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
        _ => false,
    };
    field(object, VENDOR_SELECTION_KEYS).is_some_and(non_empty)
        || field(object, DAY_ORDER_KEYS).is_some_and(non_empty)
}

fn infer_kind(object: &Map<String, Value>) -> Option<ServiceKind> {
    if has_food_selections(object) {
        Some(ServiceKind::Food)
    } else if has_any(object, MEAL_KEYS) {
        Some(ServiceKind::Meal)
    } else if has_any(object, BOX_KEYS) {
        Some(ServiceKind::Boxes)
    } else if has_any(object, &["custom_name", "customName"]) {
        Some(ServiceKind::Custom)
    } else {
        None
    }
}

fn quantity(value: &Value, context: &str) -> Result<u32, ReconcileError> {
    static NULL: Value = Value::Null;
    let raw = match value {
        Value::Object(entry) => field(entry, &["quantity", "qty"]).unwrap_or(&NULL),
        other => other,
    };
    let parsed = match raw {
        Value::Null => Some(Decimal::ZERO),
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) if text.trim().is_empty() => Some(Decimal::ZERO),
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    };
    parsed
        .filter(|number| number.fract().is_zero())
        .and_then(|number| number.to_u32())
        .ok_or_else(|| invalid(&format!("{context}: quantity MUST be a non-negative integer, got {raw}")))
}

fn decimal(value: &Value, context: &str) -> Result<Decimal, ReconcileError> {
    let parsed = match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(&format!("{context}: expected a decimal amount, got {value}")))
}

fn delivery_day(value: &Value, context: &str) -> Result<DeliveryDay, ReconcileError> {
    value
        .as_str()
        .and_then(DeliveryDay::parse)
        .ok_or_else(|| invalid(&format!("{context}: unknown delivery day {value}")))
}

/// Items arrive either as `{id: qty}` / `{id: {quantity}}` maps or as arrays of
/// `{menu_item_id | meal_item_id | itemId | id, quantity}` rows.
fn item_quantities(value: Option<&Value>, context: &str) -> Result<ItemQuantities, ReconcileError> {
    let mut items = ItemQuantities::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(entries)) => {
            for (id, raw) in entries {
                add_quantity(&mut items, ItemId::new(id.trim()), quantity(raw, &format!("{context}.{id}"))?);
            }
        }
        Some(Value::Array(rows)) => {
            for row in rows {
                let entry = row
                    .as_object()
                    .ok_or_else(|| invalid(&format!("{context}: item rows MUST be objects")))?;
                let id = text(entry, ITEM_ID_KEYS)
                    .ok_or_else(|| invalid(&format!("{context}: item row without an id")))?;
                add_quantity(&mut items, ItemId::new(id.trim()), quantity(row, &format!("{context}.{id}"))?);
            }
        }
        Some(other) => return Err(invalid(&format!("{context}: unsupported item list {other}"))),
    }
    Ok(items)
}

fn add_quantity(items: &mut ItemQuantities, id: ItemId, quantity: u32) {
    let slot = items.entry(id).or_default();
    *slot = slot.saturating_add(quantity);
}

fn item_notes(object: &Map<String, Value>) -> ItemNotes {
    field(object, NOTE_KEYS)
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(id, note)| {
                    note.as_str()
                        .filter(|note| !note.trim().is_empty())
                        .map(|note| (ItemId::new(id.trim()), note.trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn unit_values(object: &Map<String, Value>, context: &str) -> Result<UnitValues, ReconcileError> {
    let mut values = UnitValues::new();
    if let Some(entries) = field(object, UNIT_VALUE_KEYS).and_then(Value::as_object) {
        for (id, raw) in entries {
            values.insert(ItemId::new(id.trim()), decimal(raw, &format!("{context}.{id}"))?);
        }
    }
    Ok(values)
}

fn delivery_days(object: &Map<String, Value>, context: &str) -> Result<Vec<DeliveryDay>, ReconcileError> {
    let keys = ["selectedDeliveryDays", "selected_delivery_days", "deliveryDays", "delivery_days"];
    match field(object, &keys) {
        None => Ok(Vec::new()),
        Some(Value::Array(days)) => days.iter().map(|day| delivery_day(day, context)).collect(),
        Some(single @ Value::String(_)) => Ok(vec![delivery_day(single, context)?]),
        Some(other) => Err(invalid(&format!("{context}: unsupported delivery days {other}"))),
    }
}

fn vendor_selection(entry: &Value, context: &str) -> Result<FoodVendorSelection, ReconcileError> {
    let object = entry.as_object().ok_or_else(|| invalid(&format!("{context}: vendor selection MUST be an object")))?;
    let vendor_id = text(object, VENDOR_KEYS).ok_or_else(|| invalid(&format!("{context}: vendorId MUST be provided")))?;

    let mut items_by_day = BTreeMap::new();
    if let Some(days) = field(object, &["itemsByDay", "items_by_day"]).and_then(Value::as_object) {
        for (day, items) in days {
            let day = DeliveryDay::parse(day).ok_or_else(|| invalid(&format!("{context}: unknown delivery day {day:?}")))?;
            items_by_day.insert(day, item_quantities(Some(items), context)?);
        }
    }

    Ok(FoodVendorSelection {
        vendor_id: VendorId::new(vendor_id.trim()),
        items: item_quantities(field(object, ITEM_KEYS), context)?,
        item_notes: item_notes(object),
        unit_values: unit_values(object, context)?,
        delivery_days: delivery_days(object, context)?,
        items_by_day,
    })
}

fn parse_food(object: &Map<String, Value>) -> Result<FoodPlan, ReconcileError> {
    let mut selections: Vec<FoodVendorSelection> = Vec::new();

    if let Some(entries) = field(object, VENDOR_SELECTION_KEYS).and_then(Value::as_array) {
        for (index, entry) in entries.iter().enumerate() {
            selections.push(vendor_selection(entry, &format!("vendorSelections[{index}]"))?);
        }
    }

    // Per-day orders fold into `itemsByDay` of the matching vendor selection.
    if let Some(days) = field(object, DAY_ORDER_KEYS).and_then(Value::as_object) {
        for (day_name, day_order) in days {
            let day = DeliveryDay::parse(day_name)
                .ok_or_else(|| invalid(&format!("deliveryDayOrders: unknown delivery day {day_name:?}")))?;
            let entries = day_order
                .as_object()
                .and_then(|order| field(order, VENDOR_SELECTION_KEYS))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for (index, entry) in entries.iter().enumerate() {
                let context = format!("deliveryDayOrders.{day_name}[{index}]");
                let parsed = vendor_selection(entry, &context)?;
                let target = match selections.iter().position(|s| s.vendor_id == parsed.vendor_id) {
                    Some(position) => &mut selections[position],
                    None => {
                        selections.push(FoodVendorSelection {
                            vendor_id: parsed.vendor_id.clone(),
                            items: ItemQuantities::new(),
                            item_notes: ItemNotes::new(),
                            unit_values: UnitValues::new(),
                            delivery_days: Vec::new(),
                            items_by_day: BTreeMap::new(),
                        });
                        let last = selections.len() - 1;
                        &mut selections[last]
                    }
                };
                let day_items = target.items_by_day.entry(day).or_default();
                for (id, qty) in parsed.items {
                    add_quantity(day_items, id, qty);
                }
                target.item_notes.extend(parsed.item_notes);
                target.unit_values.extend(parsed.unit_values);
            }
        }
    }

    Ok(FoodPlan { vendor_selections: selections })
}

fn parse_meal(object: &Map<String, Value>) -> Result<MealPlan, ReconcileError> {
    let mut selections = BTreeMap::new();
    if let Some(entries) = field(object, MEAL_KEYS).and_then(Value::as_object) {
        for (category, entry) in entries {
            let context = format!("mealSelections.{category}");
            let selection = entry.as_object().ok_or_else(|| invalid(&format!("{context}: MUST be an object")))?;
            let day = match field(selection, &["deliveryDay", "delivery_day"]) {
                Some(raw) => Some(delivery_day(raw, &context)?),
                None => None,
            };
            selections.insert(
                category.trim().to_string(),
                MealSelection {
                    vendor_id: text(selection, VENDOR_KEYS).map(|id| VendorId::new(id.trim())),
                    items: item_quantities(field(selection, ITEM_KEYS), &context)?,
                    item_notes: item_notes(selection),
                    unit_values: unit_values(selection, &context)?,
                    delivery_day: day,
                },
            );
        }
    }
    Ok(MealPlan { selections })
}

fn box_order(object: &Map<String, Value>, context: &str) -> Result<BoxOrder, ReconcileError> {
    let vendor_id = text(object, VENDOR_KEYS).ok_or_else(|| invalid(&format!("{context}: vendorId MUST be provided")))?;
    let box_quantity = match field(object, &["quantity", "boxQuantity", "box_quantity"]) {
        Some(raw) => quantity(raw, context)?,
        None => 1,
    };
    Ok(BoxOrder {
        vendor_id: VendorId::new(vendor_id.trim()),
        box_type_id: text(object, &["boxTypeId", "box_type_id"]).map(|id| BoxTypeId::new(id.trim())),
        quantity: box_quantity,
        items: item_quantities(field(object, ITEM_KEYS), context)?,
        item_notes: item_notes(object),
        unit_values: unit_values(object, context)?,
    })
}

fn parse_boxes(object: &Map<String, Value>) -> Result<BoxesPlan, ReconcileError> {
    let mut boxes = Vec::new();
    match field(object, BOX_KEYS).and_then(Value::as_array) {
        Some(entries) => {
            for (index, entry) in entries.iter().enumerate() {
                let context = format!("boxOrders[{index}]");
                let entry = entry.as_object().ok_or_else(|| invalid(&format!("{context}: MUST be an object")))?;
                boxes.push(box_order(entry, &context)?);
            }
        }
        // Older single-box shape keeps the box fields at the top level.
        None if has_any(object, VENDOR_KEYS) => boxes.push(box_order(object, "box")?),
        None => {}
    }
    Ok(BoxesPlan { boxes })
}

fn parse_custom(object: &Map<String, Value>) -> Result<CustomPlan, ReconcileError> {
    let description = text(object, &["description", "customName", "custom_name"])
        .ok_or_else(|| invalid("custom configuration MUST carry a description"))?;
    let price = field(object, &["price", "customPrice", "custom_price"])
        .ok_or_else(|| invalid("custom configuration MUST carry a price"))?;
    let day = field(object, &["deliveryDay", "delivery_day"])
        .ok_or_else(|| invalid("custom configuration MUST carry a delivery day"))?;

    Ok(CustomPlan {
        description: description.trim().to_string(),
        price: decimal(price, "custom price")?,
        vendor_id: text(object, VENDOR_KEYS).map(|id| VendorId::new(id.trim())),
        delivery_day: delivery_day(day, "custom")?,
    })
}

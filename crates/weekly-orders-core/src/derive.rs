use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::catalog::{CatalogState, VendorRecord};
use crate::configuration::{
    BoxOrder, CustomPlan, FoodVendorSelection, ItemNotes, ItemQuantities, MealSelection,
    ServicePlan, StandingConfiguration, UnitValues,
};
use crate::model::{ClientId, DeliveryDay, ItemKind, ServiceKind, VendorId};
use crate::order::{BoxSelection, ExpectedLine, ExpectedOrder};
use crate::week::WeekBounds;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The vendor is not in the catalog at all.
    UnknownVendor,
    /// No delivery day was stored and the vendor has none configured.
    NoDeliveryDay,
    /// A meal category has items but no vendor.
    NoVendor,
    InactiveBoxVendor,
}

/// Part of a configuration that produced no order although it had something to deliver.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivationSkip {
    pub service_kind: ServiceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<VendorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_category: Option<String>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Derivation {
    pub orders: Vec<ExpectedOrder>,
    pub skipped: Vec<DerivationSkip>,
}

/// Expand one configuration into the orders it implies for `week`.
#[must_use]
pub fn derive_expected_orders(
    client_id: &ClientId,
    client_name: &str,
    configuration: &StandingConfiguration,
    week: WeekBounds,
    catalog: &CatalogState,
) -> Derivation {
    let mut deriver = Deriver {
        client_id,
        client_name,
        configuration,
        week,
        catalog,
        output: Derivation::default(),
    };

    match &configuration.plan {
        ServicePlan::Food(food) => {
            for selection in &food.vendor_selections {
                deriver.food(selection);
            }
        }
        ServicePlan::Meal(meal) => {
            for (category, selection) in &meal.selections {
                deriver.meal(category, selection);
            }
        }
        ServicePlan::Boxes(boxes) => {
            for entry in &boxes.boxes {
                deriver.boxes(entry);
            }
        }
        ServicePlan::Custom(custom) => deriver.custom(custom),
    }

    deriver.output
}

struct Deriver<'a> {
    client_id: &'a ClientId,
    client_name: &'a str,
    configuration: &'a StandingConfiguration,
    week: WeekBounds,
    catalog: &'a CatalogState,
    output: Derivation,
}

impl<'a> Deriver<'a> {
    fn food(&mut self, selection: &FoodVendorSelection) {
        let has_items = !selection.items_by_day.is_empty() || has_positive(&selection.items);
        if !has_items {
            return;
        }
        let Some(vendor) = self.known_vendor(ServiceKind::Food, &selection.vendor_id, None) else {
            return;
        };

        if !selection.items_by_day.is_empty() {
            for (day, items) in &selection.items_by_day {
                let lines =
                    self.lines(items, &selection.item_notes, &selection.unit_values, ItemKind::Menu);
                self.push_itemized(ServiceKind::Food, vendor, *day, None, lines);
            }
            if !has_positive(&selection.items) {
                return;
            }
        }

        let days = if selection.delivery_days.is_empty() {
            match self.catalog.first_delivery_day(&vendor.id) {
                Some(day) => vec![day],
                None => {
                    self.skip(ServiceKind::Food, Some(&vendor.id), None, SkipReason::NoDeliveryDay);
                    return;
                }
            }
        } else {
            selection.delivery_days.clone()
        };

        let lines = self.lines(
            &selection.items,
            &selection.item_notes,
            &selection.unit_values,
            ItemKind::Menu,
        );
        for day in days {
            self.push_itemized(ServiceKind::Food, vendor, day, None, lines.clone());
        }
    }

    fn meal(&mut self, category: &str, selection: &MealSelection) {
        if !has_positive(&selection.items) {
            return;
        }
        let Some(vendor_id) = &selection.vendor_id else {
            self.skip(ServiceKind::Meal, None, Some(category), SkipReason::NoVendor);
            return;
        };
        let Some(vendor) = self.known_vendor(ServiceKind::Meal, vendor_id, Some(category)) else {
            return;
        };
        let day = match selection.delivery_day.or_else(|| self.catalog.first_delivery_day(vendor_id)) {
            Some(day) => day,
            None => {
                self.skip(ServiceKind::Meal, Some(vendor_id), Some(category), SkipReason::NoDeliveryDay);
                return;
            }
        };

        let lines = self.lines(
            &selection.items,
            &selection.item_notes,
            &selection.unit_values,
            ItemKind::Meal,
        );
        self.push_itemized(ServiceKind::Meal, vendor, day, Some(category), lines);
    }

    fn boxes(&mut self, entry: &BoxOrder) {
        if entry.quantity == 0 {
            return;
        }
        let Some(vendor) = self.known_vendor(ServiceKind::Boxes, &entry.vendor_id, None) else {
            return;
        };
        if !vendor.is_active {
            self.skip(ServiceKind::Boxes, Some(&vendor.id), None, SkipReason::InactiveBoxVendor);
            return;
        }
        let Some(day) = self.catalog.first_delivery_day(&vendor.id) else {
            self.skip(ServiceKind::Boxes, Some(&vendor.id), None, SkipReason::NoDeliveryDay);
            return;
        };

        let contents = self.lines(&entry.items, &entry.item_notes, &entry.unit_values, ItemKind::Menu);
        let box_value: Decimal = contents.iter().map(|line| line.total_value).sum();
        let box_count = Decimal::from(entry.quantity);
        let items = contents
            .into_iter()
            .map(|line| {
                let quantity = line.quantity.saturating_mul(entry.quantity);
                ExpectedLine {
                    total_value: line.unit_value * Decimal::from(quantity),
                    quantity,
                    ..line
                }
            })
            .collect();

        let mut order = self.base(ServiceKind::Boxes, self.week.date_for(day));
        order.vendor_id = Some(vendor.id.clone());
        order.vendor_name = Some(vendor.name.clone());
        order.items = items;
        order.box_selection = Some(BoxSelection {
            box_type_id: entry.box_type_id.clone(),
            quantity: entry.quantity,
            unit_value: box_value,
            total_value: box_value * box_count,
        });
        order.total_value = box_value * box_count;
        order.total_items = entry.quantity;
        self.output.orders.push(order);
    }

    fn custom(&mut self, custom: &CustomPlan) {
        let mut order = self.base(ServiceKind::Custom, self.week.date_for(custom.delivery_day));
        order.vendor_id.clone_from(&custom.vendor_id);
        order.vendor_name = custom
            .vendor_id
            .as_ref()
            .and_then(|id| self.catalog.vendor(id))
            .map(|vendor| vendor.name.clone());
        order.custom_description = Some(custom.description.clone());
        order.total_value = custom.price;
        order.total_items = 1;
        self.output.orders.push(order);
    }

    fn known_vendor(
        &mut self,
        kind: ServiceKind,
        vendor_id: &VendorId,
        meal_category: Option<&str>,
    ) -> Option<&'a VendorRecord> {
        let catalog = self.catalog;
        let vendor = catalog.vendor(vendor_id);
        if vendor.is_none() {
            self.skip(kind, Some(vendor_id), meal_category, SkipReason::UnknownVendor);
        }
        vendor
    }

    /// Priced lines for positive quantities. Stored unit values win over catalog prices;
    /// items priced by neither are left out.
    fn lines(
        &self,
        items: &ItemQuantities,
        notes: &ItemNotes,
        unit_values: &UnitValues,
        default_kind: ItemKind,
    ) -> Vec<ExpectedLine> {
        items
            .iter()
            .filter(|(_, quantity)| **quantity > 0)
            .filter_map(|(item_id, quantity)| {
                let catalog_item = self.catalog.resolve_item(item_id);
                let unit_value = unit_values
                    .get(item_id)
                    .copied()
                    .or_else(|| catalog_item.map(|item| item.unit_value))?;
                Some(ExpectedLine {
                    item_id: item_id.clone(),
                    item_kind: catalog_item.map_or(default_kind, |item| item.kind),
                    quantity: *quantity,
                    unit_value,
                    total_value: unit_value * Decimal::from(*quantity),
                    notes: notes.get(item_id).cloned(),
                })
            })
            .collect()
    }

    fn push_itemized(
        &mut self,
        kind: ServiceKind,
        vendor: &VendorRecord,
        day: DeliveryDay,
        meal_category: Option<&str>,
        lines: Vec<ExpectedLine>,
    ) {
        if lines.is_empty() {
            return;
        }
        let mut order = self.base(kind, self.week.date_for(day));
        order.vendor_id = Some(vendor.id.clone());
        order.vendor_name = Some(vendor.name.clone());
        order.meal_category = meal_category.map(str::to_string);
        order.total_value = lines.iter().map(|line| line.total_value).sum();
        order.total_items = lines.iter().fold(0_u32, |sum, line| sum.saturating_add(line.quantity));
        order.items = lines;
        self.output.orders.push(order);
    }

    fn base(&self, kind: ServiceKind, date: Date) -> ExpectedOrder {
        ExpectedOrder {
            client_id: self.client_id.clone(),
            client_name: self.client_name.to_string(),
            service_kind: kind,
            scheduled_delivery_date: date,
            vendor_id: None,
            vendor_name: None,
            meal_category: None,
            items: Vec::new(),
            box_selection: None,
            custom_description: None,
            total_value: Decimal::ZERO,
            total_items: 0,
            notes: self.configuration.notes.clone(),
            case_id: self.configuration.case_id.clone(),
        }
    }

    fn skip(
        &mut self,
        kind: ServiceKind,
        vendor_id: Option<&VendorId>,
        meal_category: Option<&str>,
        reason: SkipReason,
    ) {
        self.output.skipped.push(DerivationSkip {
            service_kind: kind,
            vendor_id: vendor_id.cloned(),
            meal_category: meal_category.map(str::to_string),
            reason,
        });
    }
}

fn has_positive(items: &ItemQuantities) -> bool {
    items.values().any(|quantity| *quantity > 0)
}

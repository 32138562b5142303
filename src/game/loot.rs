//! World entity generation - loot spawns and vehicles

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use super::model::{LootCategory, LootSpawn, Position, Vehicle, VehicleType};

/// Every loot category, drawn uniformly
pub const LOOT_CATEGORIES: [LootCategory; 5] = [
    LootCategory::Weapon,
    LootCategory::Ammo,
    LootCategory::Armor,
    LootCategory::Healing,
    LootCategory::Attachment,
];

/// Every vehicle type, drawn uniformly
pub const VEHICLE_TYPES: [VehicleType; 5] = [
    VehicleType::Buggy,
    VehicleType::Jeep,
    VehicleType::Motorcycle,
    VehicleType::Truck,
    VehicleType::Boat,
];

/// Quantity range per spawn (inclusive)
pub const MIN_QUANTITY: u8 = 1;
pub const MAX_QUANTITY: u8 = 5;

/// Vehicles spawn with full health and fuel
pub const VEHICLE_FULL: f32 = 100.0;

impl LootCategory {
    /// Item identifiers that can spawn for this category
    pub fn item_pool(&self) -> &'static [&'static str] {
        match self {
            Self::Weapon => &["ar_m4", "ar_ak", "smg_ump", "sr_kar98", "sg_s12k", "pistol_p92"],
            Self::Ammo => &["ammo_556", "ammo_762", "ammo_9mm", "ammo_12g"],
            Self::Armor => &["helmet_l1", "helmet_l2", "vest_l1", "vest_l2", "backpack_l2"],
            Self::Healing => &["bandage", "first_aid", "med_kit", "energy_drink"],
            Self::Attachment => &["scope_2x", "scope_4x", "red_dot", "ext_mag", "suppressor"],
        }
    }
}

/// Generator for randomized world entities. Pure: callers persist results.
pub struct LootGenerator;

impl LootGenerator {
    /// Generate `count` loot spawns uniformly over the square map
    pub fn generate_loot<R: Rng + ?Sized>(
        match_id: Uuid,
        count: usize,
        half_extent: f32,
        rng: &mut R,
    ) -> Vec<LootSpawn> {
        (0..count)
            .map(|_| {
                let category = *LOOT_CATEGORIES.choose(rng).unwrap_or(&LootCategory::Ammo);
                let item_id = category
                    .item_pool()
                    .choose(rng)
                    .copied()
                    .unwrap_or_default()
                    .to_string();
                let quantity = rng.gen_range(MIN_QUANTITY..=MAX_QUANTITY);
                let position = Self::random_position(half_extent, rng);

                LootSpawn {
                    id: Uuid::new_v4(),
                    match_id,
                    x: position.x,
                    y: position.y,
                    category,
                    item_id,
                    quantity,
                    collected: false,
                    collected_by: None,
                }
            })
            .collect()
    }

    /// Generate `count` vehicles uniformly over the square map
    pub fn generate_vehicles<R: Rng + ?Sized>(
        match_id: Uuid,
        count: usize,
        half_extent: f32,
        rng: &mut R,
    ) -> Vec<Vehicle> {
        (0..count)
            .map(|_| {
                let vehicle_type = *VEHICLE_TYPES.choose(rng).unwrap_or(&VehicleType::Jeep);
                let position = Self::random_position(half_extent, rng);

                Vehicle {
                    id: Uuid::new_v4(),
                    match_id,
                    vehicle_type,
                    x: position.x,
                    y: position.y,
                    rotation: rng.gen_range(0.0..std::f32::consts::TAU),
                    health: VEHICLE_FULL,
                    fuel: VEHICLE_FULL,
                    occupied: false,
                    locked: false,
                }
            })
            .collect()
    }

    /// Uniform point in [-half_extent, half_extent] on both axes
    pub fn random_position<R: Rng + ?Sized>(half_extent: f32, rng: &mut R) -> Position {
        let h = half_extent.abs();
        Position::new(rng.gen_range(-h..=h), rng.gen_range(-h..=h))
    }

    /// Spawn point for a player: random angle, within 80% of the zone radius
    pub fn spawn_position<R: Rng + ?Sized>(zone_radius: f32, rng: &mut R) -> Position {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = rng.gen_range(0.0..=zone_radius.max(0.0) * 0.8);
        Position::new(angle.cos() * distance, angle.sin() * distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn loot_respects_bounds_and_pools() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let match_id = Uuid::new_v4();
        let loot = LootGenerator::generate_loot(match_id, 500, 1000.0, &mut rng);

        assert_eq!(loot.len(), 500);
        for item in &loot {
            assert_eq!(item.match_id, match_id);
            assert!(item.x.abs() <= 1000.0 && item.y.abs() <= 1000.0);
            assert!((MIN_QUANTITY..=MAX_QUANTITY).contains(&item.quantity));
            assert!(item.category.item_pool().contains(&item.item_id.as_str()));
            assert!(!item.collected);
        }

        let categories: HashSet<_> = loot.iter().map(|l| l.category).collect();
        assert_eq!(categories.len(), LOOT_CATEGORIES.len());
        let quantities: HashSet<_> = loot.iter().map(|l| l.quantity).collect();
        assert_eq!(quantities.len(), 5);
    }

    #[test]
    fn loot_ids_are_unique() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let loot = LootGenerator::generate_loot(Uuid::new_v4(), 50, 500.0, &mut rng);
        let ids: HashSet<_> = loot.iter().map(|l| l.id).collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn zero_count_generates_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert!(LootGenerator::generate_loot(Uuid::new_v4(), 0, 500.0, &mut rng).is_empty());
        assert!(LootGenerator::generate_vehicles(Uuid::new_v4(), 0, 500.0, &mut rng).is_empty());
    }

    #[test]
    fn vehicles_start_full() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let vehicles = LootGenerator::generate_vehicles(Uuid::new_v4(), 40, 750.0, &mut rng);

        assert_eq!(vehicles.len(), 40);
        for v in &vehicles {
            assert_eq!(v.health, VEHICLE_FULL);
            assert_eq!(v.fuel, VEHICLE_FULL);
            assert!(!v.occupied && !v.locked);
            assert!(v.x.abs() <= 750.0 && v.y.abs() <= 750.0);
        }
    }

    #[test]
    fn spawn_positions_inside_zone() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        for _ in 0..100 {
            let p = LootGenerator::spawn_position(1000.0, &mut rng);
            assert!(p.distance_to(Position::default()) <= 800.5);
        }
    }
}

//! Shared fixtures for the integration suites: a small content pack
//! (item definitions, affixes, loot tables) and session helpers.

use rogue_core::model::{AffixRegistry, ItemDefRegistry, LootTables};

pub const ITEM_DEFS: &str = "\
# id,name,cat,lvl,stack,value,dmin,dmax,armor,sheet,tx,ty,tw,th,rarity,flags,impl...,set,smin,smax
long_sword,Long Sword,2,1,1,25,4,9,0,items.png,0,0,16,16,1,0,0,0,0,0,0,0,0,0,0,0,0,-1,0,2
iron_sword,Iron Sword,2,1,1,15,3,7,0,items.png,1,0,16,16,0,0,0,0,0,0,0,0,0,0,0,0,0,-1,0,1
arcane_dust,Arcane Dust,5,1,50,3,0,0,0,items.png,2,0,16,16
leather_cap,Leather Cap,3,1,1,12,0,0,3,items.png,3,0,16,16,0,0,0,0,0,0,0,0,0,0,0,0,0,-1,0,0
enchant_orb,Enchant Orb,5,1,99,40,0,0,0,items.png,4,0,16,16
reforge_hammer,Reforge Hammer,5,1,99,80,0,0,0,items.png,5,0,16,16
";

pub const AFFIXES: &str = "\
PREFIX,sharp,damage_flat,1,5,10,8,6,4,2
PREFIX,swift,agility_flat,1,4,10,8,6,4,2
SUFFIX,of_agility,agility_flat,1,4,10,8,6,4,2
SUFFIX,of_readiness,none,1,3,4,4,4,4,4
";

pub const LOOT_TABLES: &str = "\
swords,1,1,long_sword,10,1,1,3,3;iron_sword,5,1,1,0,2
materials,1,2,arcane_dust,10,1,3,0,1
";

pub struct ContentPack {
    pub defs: ItemDefRegistry,
    pub affixes: AffixRegistry,
    pub tables: LootTables,
}

pub fn load_content() -> ContentPack {
    let mut defs = ItemDefRegistry::new();
    assert_eq!(defs.load_from_str(ITEM_DEFS), 6);
    let mut affixes = AffixRegistry::new();
    assert_eq!(affixes.load_from_str(AFFIXES), 4);
    let mut tables = LootTables::new();
    assert_eq!(tables.load_from_str(LOOT_TABLES, &defs), 2);
    ContentPack {
        defs,
        affixes,
        tables,
    }
}

use rustc_hash::FxHashMap;
use tracing::warn;

/// A single value from a tag file's level data, as far as level metadata uses them
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldType {
    Bool,
    Int,
    Long,
    String,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    String(String),
}

impl FieldValue {
    /// Integer tags are widened, and byte or int tags map to `true` if they are 1. Anything
    ///  else is a type mismatch.
    fn from_tag(field_type: FieldType, tag: &TagValue) -> Option<FieldValue> {
        match (field_type, tag) {
            (FieldType::Bool, TagValue::Byte(b)) => Some(FieldValue::Bool(*b == 1)),
            (FieldType::Bool, TagValue::Int(i)) => Some(FieldValue::Bool(*i == 1)),
            (FieldType::Int, TagValue::Byte(b)) => Some(FieldValue::Int(*b as i32)),
            (FieldType::Int, TagValue::Short(s)) => Some(FieldValue::Int(*s as i32)),
            (FieldType::Int, TagValue::Int(i)) => Some(FieldValue::Int(*i)),
            (FieldType::Long, TagValue::Byte(b)) => Some(FieldValue::Long(*b as i64)),
            (FieldType::Long, TagValue::Short(s)) => Some(FieldValue::Long(*s as i64)),
            (FieldType::Long, TagValue::Int(i)) => Some(FieldValue::Long(*i as i64)),
            (FieldType::Long, TagValue::Long(l)) => Some(FieldValue::Long(*l)),
            (FieldType::String, TagValue::String(s)) => Some(FieldValue::String(s.clone())),
            _ => None,
        }
    }

    fn into_tag(self) -> TagValue {
        match self {
            FieldValue::Bool(b) => TagValue::Byte(b as i8),
            FieldValue::Int(i) => TagValue::Int(i),
            FieldValue::Long(l) => TagValue::Long(l),
            FieldValue::String(s) => TagValue::String(s),
        }
    }
}

/// Level metadata, i.e. the 'Data' compound of a level file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelInfo {
    pub version: i32,
    pub initialized: bool,
    pub level_name: String,
    pub generator_name: String,
    pub generator_version: i32,
    pub generator_options: String,
    pub random_seed: i64,
    pub map_features: bool,
    pub last_played: i64,
    pub allow_commands: bool,
    pub hardcore: bool,
    pub game_type: i32,
    pub time: i64,
    pub day_time: i64,
    pub spawn_x: i32,
    pub spawn_y: i32,
    pub spawn_z: i32,
    pub raining: bool,
    pub rain_time: i32,
    pub thundering: bool,
    pub thunder_time: i32,
}

macro_rules! level_info_fields {
    ($($name:literal => $field:ident: $ty:ident),* $(,)?) => {
        /// The mapping between tag names and [LevelInfo] fields, with the declared type of each
        pub const LEVEL_INFO_FIELDS: &[(&str, FieldType)] = &[
            $(($name, FieldType::$ty)),*
        ];

        impl LevelInfo {
            fn set_field(&mut self, name: &str, value: FieldValue) -> bool {
                match (name, value) {
                    $(($name, FieldValue::$ty(v)) => {
                        self.$field = v;
                        true
                    })*
                    _ => false,
                }
            }

            fn get_field(&self, name: &str) -> Option<FieldValue> {
                match name {
                    $($name => Some(FieldValue::$ty(self.$field.clone())),)*
                    _ => None,
                }
            }
        }
    };
}

level_info_fields! {
    "Version" => version: Int,
    "Initialized" => initialized: Bool,
    "LevelName" => level_name: String,
    "GeneratorName" => generator_name: String,
    "GeneratorVersion" => generator_version: Int,
    "GeneratorOptions" => generator_options: String,
    "RandomSeed" => random_seed: Long,
    "MapFeatures" => map_features: Bool,
    "LastPlayed" => last_played: Long,
    "AllowCommands" => allow_commands: Bool,
    "Hardcore" => hardcore: Bool,
    "GameType" => game_type: Int,
    "Time" => time: Long,
    "DayTime" => day_time: Long,
    "SpawnX" => spawn_x: Int,
    "SpawnY" => spawn_y: Int,
    "SpawnZ" => spawn_z: Int,
    "Raining" => raining: Bool,
    "RainTime" => rain_time: Int,
    "Thundering" => thundering: Bool,
    "ThunderTime" => thunder_time: Int,
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl LevelInfo {
    /// Reads the known fields from a level's tags. A tag is looked up by its field name, and
    ///  with a lowercase first letter if that does not exist. Missing tags leave the default
    ///  value, tags of an unexpected type are skipped with a warning.
    pub fn from_tags(tags: &FxHashMap<String, TagValue>) -> LevelInfo {
        let mut result = LevelInfo::default();

        for &(name, field_type) in LEVEL_INFO_FIELDS {
            let tag = match tags.get(name).or_else(|| tags.get(&lowercase_first(name))) {
                Some(tag) => tag,
                None => continue,
            };
            match FieldValue::from_tag(field_type, tag) {
                Some(value) => {
                    result.set_field(name, value);
                }
                None => warn!("level tag {} should be {:?}, is {:?} - skipping", name, field_type, tag),
            }
        }
        result
    }

    pub fn to_tags(&self) -> FxHashMap<String, TagValue> {
        LEVEL_INFO_FIELDS.iter()
            .filter_map(|&(name, _)| self.get_field(name).map(|v| (name.to_string(), v.into_tag())))
            .collect()
    }
}

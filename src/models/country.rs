//! Country catalog
//!
//! ISO 3166-1 alpha-2 codes understood by the upstream proxy networks, plus
//! the subset routable through the super-proxy style providers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RotaError;

macro_rules! countries {
    ($($variant:ident => $code:literal,)+) => {
        /// Exit-node country, identified by its lowercase ISO code
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum Country {
            $($variant,)+
        }

        impl Country {
            /// Every known country, sorted by code
            pub const ALL: &'static [Country] = &[$(Country::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Country::$variant => $code,)+
                }
            }

            pub fn from_code(code: &str) -> Option<Self> {
                match code.trim().to_lowercase().as_str() {
                    $($code => Some(Country::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

countries! {
    Andorra => "ad",
    UnitedArabEmirates => "ae",
    AntiguaAndBarbuda => "ag",
    Anguilla => "ai",
    Albania => "al",
    Armenia => "am",
    Angola => "ao",
    Antarctica => "aq",
    Argentina => "ar",
    AmericanSamoa => "as",
    Austria => "at",
    Australia => "au",
    Aruba => "aw",
    AlandIslands => "ax",
    Azerbaijan => "az",
    BosniaAndHerzegovina => "ba",
    Barbados => "bb",
    Bangladesh => "bd",
    Belgium => "be",
    BurkinaFaso => "bf",
    Bulgaria => "bg",
    Bahrain => "bh",
    Burundi => "bi",
    Benin => "bj",
    SaintBarthelemy => "bl",
    Bermuda => "bm",
    Bolivia => "bo",
    Bonaire => "bq",
    Brazil => "br",
    Bahamas => "bs",
    Bhutan => "bt",
    BouvetIsland => "bv",
    Botswana => "bw",
    Belarus => "by",
    Belize => "bz",
    Canada => "ca",
    CocosIslands => "cc",
    TheDemocraticRepublicOfTheCongo => "cd",
    CentralAfricanRepublic => "cf",
    Congo => "cg",
    Switzerland => "ch",
    CoteDivoire => "ci",
    CookIslands => "ck",
    Chile => "cl",
    Cameroon => "cm",
    China => "cn",
    Colombia => "co",
    CostaRica => "cr",
    Cuba => "cu",
    CapeVerde => "cv",
    Curacao => "cw",
    ChristmasIsland => "cx",
    Cyprus => "cy",
    CzechRepublic => "cz",
    Germany => "de",
    Djibouti => "dj",
    Denmark => "dk",
    Dominica => "dm",
    DominicanRepublic => "do",
    Algeria => "dz",
    Ecuador => "ec",
    Estonia => "ee",
    Egypt => "eg",
    WesternSahara => "eh",
    Eritrea => "er",
    Spain => "es",
    Ethiopia => "et",
    Finland => "fi",
    Fiji => "fj",
    FalklandIslands => "fk",
    FederatedStatesOfMicronesia => "fm",
    FaroeIslands => "fo",
    France => "fr",
    Gabon => "ga",
    UnitedKingdom => "gb",
    Grenada => "gd",
    Georgia => "ge",
    FrenchGuiana => "gf",
    Guernsey => "gg",
    Ghana => "gh",
    Gibraltar => "gi",
    Greenland => "gl",
    Gambia => "gm",
    Guinea => "gn",
    Guadeloupe => "gp",
    EquatorialGuinea => "gq",
    Greece => "gr",
    SouthGeorgiaAndTheSouthSandwichIslands => "gs",
    Guatemala => "gt",
    Guam => "gu",
    GuineaBissau => "gw",
    Guyana => "gy",
    HongKong => "hk",
    HeardIslandAndMcdonaldIslands => "hm",
    Honduras => "hn",
    Croatia => "hr",
    Haiti => "ht",
    Hungary => "hu",
    Indonesia => "id",
    Ireland => "ie",
    Israel => "il",
    IsleOfMan => "im",
    India => "in",
    BritishIndianOceanTerritory => "io",
    Iran => "ir",
    Iceland => "is",
    Italy => "it",
    Jersey => "je",
    Jamaica => "jm",
    Jordan => "jo",
    Japan => "jp",
    Kyrgyzstan => "kg",
    Cambodia => "kh",
    Kiribati => "ki",
    Comoros => "km",
    SaintKittsAndNevis => "kn",
    SouthKorea => "kr",
    Kuwait => "kw",
    CaymanIslands => "ky",
    Kazakhstan => "kz",
    LaoPeoplesDemocraticRepublic => "la",
    Lebanon => "lb",
    SaintLucia => "lc",
    Liechtenstein => "li",
    SriLanka => "lk",
    Liberia => "lr",
    Lesotho => "ls",
    Lithuania => "lt",
    Luxembourg => "lu",
    Latvia => "lv",
    Libya => "ly",
    Morocco => "ma",
    Monaco => "mc",
    Moldova => "md",
    Montenegro => "me",
    SaintMartinFrenchPart => "mf",
    Madagascar => "mg",
    MarshallIslands => "mh",
    Macedonia => "mk",
    Mali => "ml",
    Myanmar => "mm",
    Mongolia => "mn",
    Macao => "mo",
    NorthernMarianaIslands => "mp",
    Martinique => "mq",
    Mauritania => "mr",
    Montserrat => "ms",
    Malta => "mt",
    Mauritius => "mu",
    Maldives => "mv",
    Malawi => "mw",
    Mexico => "mx",
    Malaysia => "my",
    Mozambique => "mz",
    Namibia => "na",
    NewCaledonia => "nc",
    Niger => "ne",
    NorfolkIsland => "nf",
    Nigeria => "ng",
    Nicaragua => "ni",
    Netherlands => "nl",
    Norway => "no",
    Nepal => "np",
    Nauru => "nr",
    Niue => "nu",
    NewZealand => "nz",
    Oman => "om",
    Panama => "pa",
    Peru => "pe",
    FrenchPolynesia => "pf",
    PapuaNewGuinea => "pg",
    Philippines => "ph",
    Poland => "pl",
    SaintPierreAndMiquelon => "pm",
    Pitcairn => "pn",
    PuertoRico => "pr",
    PalestinianTerritory => "ps",
    Portugal => "pt",
    Palau => "pw",
    Paraguay => "py",
    Qatar => "qa",
    Reunion => "re",
    Romania => "ro",
    Serbia => "rs",
    RussianFederation => "ru",
    Rwanda => "rw",
    SaudiArabia => "sa",
    SolomonIslands => "sb",
    Seychelles => "sc",
    Sudan => "sd",
    Sweden => "se",
    Singapore => "sg",
    SaintHelena => "sh",
    Slovenia => "si",
    SvalbardAndJanMayen => "sj",
    Slovakia => "sk",
    SierraLeone => "sl",
    SanMarino => "sm",
    Senegal => "sn",
    Somalia => "so",
    Suriname => "sr",
    SouthSudan => "ss",
    SaoTomeAndPrincipe => "st",
    ElSalvador => "sv",
    SintMaartenDutchPart => "sx",
    SyrianArabRepublic => "sy",
    Swaziland => "sz",
    TurksAndCaicosIslands => "tc",
    Chad => "td",
    FrenchSouthernTerritories => "tf",
    Togo => "tg",
    Thailand => "th",
    Tajikistan => "tj",
    Tokelau => "tk",
    TimorLeste => "tl",
    Turkmenistan => "tm",
    Tunisia => "tn",
    Tonga => "to",
    Turkey => "tr",
    TrinidadAndTobago => "tt",
    Tuvalu => "tv",
    Taiwan => "tw",
    Tanzania => "tz",
    Ukraine => "ua",
    Uganda => "ug",
    UnitedStatesMinorOutlyingIslands => "um",
    UnitedStates => "us",
    Uruguay => "uy",
    Uzbekistan => "uz",
    HolySeeVaticanCityState => "va",
    SaintVincentAndTheGrenadines => "vc",
    Venezuela => "ve",
    VirginIslandsBritish => "vg",
    VirginIslandsUs => "vi",
    VietNam => "vn",
    Vanuatu => "vu",
    WallisAndFutuna => "wf",
    Samoa => "ws",
    Yemen => "ye",
    Mayotte => "yt",
    SouthAfrica => "za",
    Zambia => "zm",
    Zimbabwe => "zw",}

/// Countries reachable through the super-proxy networks
pub const SUPERPROXY_COUNTRIES: &[Country] = &[
    Country::UnitedStates,
    Country::UnitedKingdom,
    Country::Albania,
    Country::Argentina,
    Country::Armenia,
    Country::Australia,
    Country::Austria,
    Country::Azerbaijan,
    Country::Bangladesh,
    Country::Belarus,
    Country::Belgium,
    Country::Bolivia,
    Country::Brazil,
    Country::Bulgaria,
    Country::Cambodia,
    Country::Canada,
    Country::Chile,
    Country::China,
    Country::Colombia,
    Country::CostaRica,
    Country::Croatia,
    Country::Cyprus,
    Country::CzechRepublic,
    Country::Denmark,
    Country::DominicanRepublic,
    Country::Ecuador,
    Country::Egypt,
    Country::Estonia,
    Country::Finland,
    Country::France,
    Country::Georgia,
    Country::Germany,
    Country::Greece,
    Country::Guatemala,
    Country::HongKong,
    Country::Hungary,
    Country::Iceland,
    Country::India,
    Country::Indonesia,
    Country::Ireland,
    Country::IsleOfMan,
    Country::Israel,
    Country::Italy,
    Country::Jamaica,
    Country::Japan,
    Country::Jordan,
    Country::Kazakhstan,
    Country::Kyrgyzstan,
    Country::LaoPeoplesDemocraticRepublic,
    Country::Latvia,
    Country::Lithuania,
    Country::Luxembourg,
    Country::Malaysia,
    Country::Mexico,
    Country::Moldova,
    Country::Netherlands,
    Country::NewZealand,
    Country::Norway,
    Country::Portugal,
    Country::Peru,
    Country::Philippines,
    Country::RussianFederation,
    Country::SaudiArabia,
    Country::Singapore,
    Country::SouthKorea,
    Country::Spain,
    Country::SriLanka,
    Country::Sweden,
    Country::Switzerland,
    Country::Taiwan,
    Country::Tajikistan,
    Country::Thailand,
    Country::Turkey,
    Country::Turkmenistan,
    Country::Ukraine,
    Country::UnitedArabEmirates,
    Country::Uzbekistan,
    Country::VietNam,
];

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Country {
    type Err = RotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Country::from_code(s)
            .ok_or_else(|| RotaError::InvalidConfig(format!("unknown country code: {}", s)))
    }
}

impl TryFrom<String> for Country {
    type Error = RotaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Country> for &'static str {
    fn from(country: Country) -> Self {
        country.as_str()
    }
}

/// Parse a comma-separated list of country codes, e.g. `"fr, es"`
pub fn parse_country_list(raw: &str) -> Result<Vec<Country>, RotaError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

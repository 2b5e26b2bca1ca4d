use crate::types::{LatLon, PlotError, PlotResult};

/// Named volcanoes with summit coordinates (degrees)
const VOLCANOES: &[(&str, f64, f64)] = &[
    ("Kilauea", 19.421, -155.287),
    ("Mauna Loa", 19.475, -155.608),
    ("Unzendake", 32.761, 130.299),
    ("Merapi", -7.54, 110.446),
    ("Etna", 37.748, 14.999),
    ("Fuego", 14.473, -90.880),
    ("Campi Flegrei", 40.827, 14.139),
    ("Taal", 14.002, 120.993),
    ("Agung", -8.343, 115.508),
    ("Erebus", -77.53, 167.17),
];

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Summit position of a volcano; case, spaces and underscores are ignored
pub fn lookup(name: &str) -> PlotResult<LatLon> {
    let wanted = normalize(name);
    VOLCANOES
        .iter()
        .find(|(known, _, _)| normalize(known) == wanted)
        .map(|&(_, lat, lon)| LatLon::new(lat, lon))
        .ok_or_else(|| {
            PlotError::InputResolution(format!(
                "Unknown volcano '{}', known: {}",
                name,
                names().join(", ")
            ))
        })
}

pub fn names() -> Vec<&'static str> {
    VOLCANOES.iter().map(|(name, _, _)| *name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case_and_separators() {
        let kilauea = lookup("kilauea").unwrap();
        assert_eq!(kilauea, LatLon::new(19.421, -155.287));
        assert_eq!(lookup("Mauna_Loa").unwrap(), lookup("mauna loa").unwrap());
        assert_eq!(lookup("CampiFlegrei").unwrap().lat, 40.827);
    }

    #[test]
    fn test_unknown_volcano() {
        assert!(matches!(lookup("Atlantis"), Err(PlotError::InputResolution(_))));
    }
}

use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use quire_blocks::{PropertyConfig, PropertyRegistry, PropertySchema, PropertyType, PropertyValue};

#[derive(Debug, Args)]
pub struct PropertyArgs {
    /// Property type (text, number, select, multi_select, date, checkbox, url, email)
    #[arg(value_parser = parse_property_type)]
    pub kind: PropertyType,

    /// Raw input as typed into the field
    pub input: String,

    /// Allowed option for select / multi_select (repeatable)
    #[arg(long = "option")]
    pub options: Vec<String>,

    /// Fixed decimals for numbers
    #[arg(long)]
    pub decimals: Option<u8>,
}

fn parse_property_type(name: &str) -> Result<PropertyType, String> {
    PropertyType::ALL
        .into_iter()
        .find(|kind| kind.as_str() == name)
        .ok_or_else(|| {
            let known: Vec<&str> = PropertyType::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown property type {:?}, expected one of {}", name, known.join(", "))
        })
}

/// Parse raw input and format it back for display
pub fn evaluate(registry: &PropertyRegistry, schema: &PropertySchema, input: &str) -> Result<(PropertyValue, String)> {
    let value = registry
        .parse_input(schema, input)
        .map_err(|e| anyhow!(e))?;
    let shown = registry.display(schema, &value).map_err(|e| anyhow!(e))?;
    Ok((value, shown))
}

pub fn property(args: PropertyArgs, _cwd: &str) -> Result<()> {
    let schema = PropertySchema {
        name: "value".to_string(),
        kind: args.kind,
        config: PropertyConfig {
            options: args.options,
            decimals: args.decimals,
        },
    };

    let (value, shown) = evaluate(PropertyRegistry::global(), &schema, &args.input)?;
    eprintln!("{} {} → {}", "✓".green(), args.kind, shown.bright_white());
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(parse_property_type("multi_select"), Ok(PropertyType::MultiSelect));
        assert!(parse_property_type("rating").unwrap_err().contains("checkbox"));
    }

    #[test]
    fn test_number_with_decimals() {
        let schema = PropertySchema {
            config: PropertyConfig {
                decimals: Some(2),
                ..Default::default()
            },
            ..PropertySchema::new("Cost", PropertyType::Number)
        };
        let (value, shown) = evaluate(PropertyRegistry::global(), &schema, "3.5").unwrap();
        assert_eq!(value, PropertyValue::Number(3.5));
        assert_eq!(shown, "3.50");
    }

    #[test]
    fn test_select_outside_options() {
        let schema = PropertySchema::new("Status", PropertyType::Select).with_options(&["Todo", "Done"]);
        assert!(evaluate(PropertyRegistry::global(), &schema, "Later").is_err());
    }
}

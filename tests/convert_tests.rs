//! Representation converter tests

use campaign_sdk_core::convert::{
    Entity, EntityAccess, EntityRef, Flavor, Representation, from_json, to_json,
};
use campaign_sdk_core::convert::entity::EntityValue;
use campaign_sdk_core::dom::Element;
use serde_json::json;

const RECIPIENT: &str = r#"<recipient email="jane@example.com" firstName="Jane" id="42">
  <folder id="1184" label="Recipients"/>
  <comment>VIP</comment>
</recipient>"#;

mod badgerfish_tests {
    use super::*;

    #[test]
    fn test_markup_to_badgerfish() {
        let element = Element::parse(RECIPIENT).unwrap();
        let json = to_json(&element, Flavor::BadgerFish);
        assert_eq!(
            json,
            json!({
                "@email": "jane@example.com",
                "@firstName": "Jane",
                "@id": "42",
                "folder": { "@id": "1184", "@label": "Recipients" },
                "comment": { "$": "VIP" }
            })
        );
    }

    #[test]
    fn test_badgerfish_round_trip() {
        let element = Element::parse(RECIPIENT).unwrap();
        let json = to_json(&element, Flavor::BadgerFish);
        let back = from_json("recipient", &json, Flavor::BadgerFish).unwrap();
        assert_eq!(to_json(&back, Flavor::BadgerFish), json);
        assert_eq!(back.attribute("email"), Some("jane@example.com"));
        assert_eq!(back.first_child("comment").unwrap().text(), "VIP");
    }

    #[test]
    fn test_numbers_and_booleans_become_strings() {
        let element = from_json(
            "delivery",
            &json!({ "@id": 12, "@deleted": false, "@ratio": 0.5 }),
            Flavor::BadgerFish,
        )
        .unwrap();
        assert_eq!(element.attribute("id"), Some("12"));
        assert_eq!(element.attribute("deleted"), Some("false"));
        assert_eq!(element.attribute("ratio"), Some("0.5"));
    }

    #[test]
    fn test_array_as_attribute_is_rejected() {
        let result = from_json("delivery", &json!({ "@id": [1, 2] }), Flavor::BadgerFish);
        assert!(result.is_err());
    }

    #[test]
    fn test_collection_suffix_forces_arrays() {
        let element = Element::parse(
            r#"<recipient-collection><recipient id="1"/></recipient-collection>"#,
        )
        .unwrap();
        let json = to_json(&element, Flavor::BadgerFish);
        assert_eq!(json, json!({ "recipient": [ { "@id": "1" } ] }));

        let empty = Element::parse(r#"<recipient-collection/>"#).unwrap();
        assert_eq!(to_json(&empty, Flavor::BadgerFish), json!({}));
    }

    #[test]
    fn test_single_sibling_is_not_an_array() {
        let element = Element::parse(r#"<query><select><node expr="@id"/></select></query>"#).unwrap();
        let json = to_json(&element, Flavor::BadgerFish);
        assert!(json["select"]["node"].is_object());
    }
}

mod simple_json_tests {
    use super::*;

    #[test]
    fn test_markup_to_simple_json() {
        let element = Element::parse(RECIPIENT).unwrap();
        let json = to_json(&element, Flavor::SimpleJson);
        assert_eq!(
            json,
            json!({
                "email": "jane@example.com",
                "firstName": "Jane",
                "id": "42",
                "folder": { "id": "1184", "label": "Recipients" },
                "$comment": "VIP"
            })
        );
    }

    #[test]
    fn test_simple_json_round_trip() {
        let json = json!({
            "email": "jane@example.com",
            "folder": { "id": "1184" },
            "$comment": "VIP",
            "address": [ { "line": "1" }, { "line": "2" } ]
        });
        let element = from_json("recipient", &json, Flavor::SimpleJson).unwrap();
        assert_eq!(element.children_named("address").count(), 2);
        assert_eq!(to_json(&element, Flavor::SimpleJson), json);
    }

    #[test]
    fn test_null_values_are_skipped() {
        let element = from_json("recipient", &json!({ "email": null }), Flavor::SimpleJson).unwrap();
        assert!(element.attribute("email").is_none());
    }
}

mod entity_tests {
    use super::*;

    #[test]
    fn test_entity_changes_representation() {
        let entity = Entity::from_xml(Element::parse(RECIPIENT).unwrap())
            .with_representation(Representation::SimpleJson);
        match entity.to_value() {
            EntityValue::Json { flavor, value } => {
                assert_eq!(flavor, Flavor::SimpleJson);
                assert_eq!(value["$comment"], "VIP");
            }
            other => panic!("expected JSON, got {:?}", other),
        }
    }

    #[test]
    fn test_accessor_is_representation_independent() {
        let element = Element::parse(RECIPIENT).unwrap();
        let fat = to_json(&element, Flavor::BadgerFish);
        let simple = to_json(&element, Flavor::SimpleJson);

        let views = [
            EntityRef::Xml(&element),
            EntityRef::from_json(&fat, Flavor::BadgerFish).unwrap(),
            EntityRef::from_json(&simple, Flavor::SimpleJson).unwrap(),
        ];
        for view in &views {
            assert_eq!(view.get_attribute_as_string("email"), "jane@example.com");
            assert_eq!(view.get_attribute_as_long("id"), 42);
            assert!(!view.get_attribute_as_boolean("missing"));
            let folder = view.get_element("folder").unwrap();
            assert_eq!(folder.get_attribute_as_long("id"), 1184);
            assert_eq!(view.get_child_elements(Some("folder")).len(), 1);
        }
    }
}
